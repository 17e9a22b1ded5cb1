mod acquire;
mod error;
mod lang;
mod pipeline;

pub use acquire::ImageSource;
pub use error::{PipelineError, PipelineResult};
pub use lang::{resolve, ResolvedLanguage, FALLBACK_CODE, SOURCE_LANG, SUPPORTED_LANGUAGES};
pub use pipeline::{Pipeline, PipelineOutput};
