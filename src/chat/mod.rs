//! Chat relay: session transcript, pluggable completion backend and the
//! bubble renderer.

mod backend;
mod relay;
mod render;
mod transcript;

pub use backend::{ChatBackend, CompletionClient, ProviderKind};
pub use relay::{ChatRelay, ChatSession, RelayState, SubmitOutcome, ERROR_PLACEHOLDER};
pub use render::{markdown_to_html, render_transcript};
pub use transcript::{Role, Transcript, Turn};
