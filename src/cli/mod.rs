// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `convert`  — pretrained checkpoint → portable format
//   2. `finetune` — train a motor-imagery head on CSV logs,
//                   then export the classifier

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, ConvertArgs, FinetuneArgs};

use crate::infra::export::ExportSummary;

#[derive(Parser, Debug)]
#[command(
    name = "neurogpt-mi",
    version,
    about = "Fine-tune a pretrained NeuroGPT backbone on motor-imagery EEG and export it."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Route the subcommand to its use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Convert(args)  => run_convert(args),
            Commands::Finetune(args) => run_finetune(args),
        }
    }
}

fn run_convert(args: ConvertArgs) -> Result<()> {
    use crate::application::convert_use_case::ConvertUseCase;

    tracing::info!("Converting '{}' as {}", args.weights, args.model_class);
    let summary = ConvertUseCase::new(args.into()).execute()?;
    print_summary(&summary);
    Ok(())
}

fn run_finetune(args: FinetuneArgs) -> Result<()> {
    use crate::application::finetune_use_case::FinetuneUseCase;

    tracing::info!("Fine-tuning on logs matching '{}'", args.data_glob);
    let summary = FinetuneUseCase::new(args.into()).execute()?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &ExportSummary) {
    println!("[ok] exported: {}", summary.weights_path.display());
    println!("     manifest: {}", summary.manifest_path.display());
}
