//! Shopping agent: routing, chat and image-URL handling.
//!
//! ```text
//!  request ──▶ IntentRouter ──┬── uploaded image ────────────────┐
//!                             ├── image URL ─▶ unwrap ─▶ fetch ──┼──▶ image search
//!                             └── message ─▶ ChatHandler         │
//!                                              ├─ recommend ─▶ text search (+ summary)
//!                                              ├─ chat ──────▶ hosted model / local
//!                                              └─ image hint
//! ```

pub mod chat;
pub mod fetch;
pub mod llm;
pub mod parser;
pub mod router;
pub mod unwrap;

pub use chat::ChatHandler;
pub use fetch::ImageFetcher;
pub use llm::{ChatModel, GeminiChat, OpenAiChat};
pub use parser::{parse_message, Intent, ParsedMessage};
pub use router::{IntentRouter, Mode, RouteRequest, RouteResponse};
pub use unwrap::{is_http_url, unwrap_image_url};
