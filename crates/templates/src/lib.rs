//! Per-recipient message rendering.
//!
//! Templates carry `{{.Name}}` placeholders. Rendering substitutes the
//! recipient's values, builds the tracking URLs (base URL + `?rid=<id>`), and
//! leaves anything it does not recognize untouched. Rendering is pure: the same
//! template and context always produce byte-identical output.

pub mod context;
pub mod error;
pub mod render;

pub use context::{RecipientDetails, RenderContext, TemplateFields};
pub use error::RenderError;
pub use render::{PlaceholderRenderer, Renderer, render};
