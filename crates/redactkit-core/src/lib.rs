pub mod arbitration;
pub mod config;
pub mod context;
pub mod engine;
pub mod exclusions;
pub mod external;
pub mod field;
pub mod inference;
pub mod ollama;
pub mod pattern;
pub mod prompt_loader;
pub mod redaction;
pub mod validators;


pub use arbitration::{arbitrate, filter_excluded};
pub use config::{Config, DetectionConfig, ExclusionConfig, LlmConfig};
pub use context::{ContextMatcher, ContextSettings};
pub use engine::{DetectionEngine, DetectionResult, DetectionStatistics, Strategy};
pub use exclusions::{ExclusionStatistics, ExclusionStore, MemoryExclusionStore, SqliteExclusionStore};
pub use external::{EntityProvider, ExternalEntity};
pub use field::{normalize_field_name, parse_records, FieldMatcher, FieldRecord};
pub use inference::{classify_examples, infer_pattern, ExampleShape, InferredPattern};
pub use ollama::{OllamaClient, OllamaConfig};
pub use pattern::{EntityKind, Match, MatchMethod, Pattern, PatternCategory, PatternSet};
pub use prompt_loader::PromptLoader;
pub use redaction::{redact, RedactionKind, RedactionPolicy, RedactionStyle};
