//! Export of analytics results to documents and spreadsheets.
//!
//! [`ExportTokenBroker`] bootstraps the export client from the server's public
//! configuration, obtains an OAuth2 grant through a [`ConsentPrompt`] and runs
//! the two-step create-then-populate calls.

mod broker;
mod error;
mod issuer;
mod report;
mod workspace;

pub use broker::{ExportPhase, ExportTokenBroker};
pub use error::{BootstrapError, ConsentError, ExportError};
pub use issuer::{ConsentPrompt, ConsentRequest, ConsentResponse, ExportGrant};
pub use report::{report_title, rows_from_csv, ReportKind};
