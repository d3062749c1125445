// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one goal per command (convert a checkpoint, fine-tune a
// classifier).
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - No file format details (that's Layer 4 and 6)
//   - Only workflow coordination

// Checkpoint → portable format
pub mod convert_use_case;

// Windowed EEG logs → fine-tuned, exported classifier
pub mod finetune_use_case;
