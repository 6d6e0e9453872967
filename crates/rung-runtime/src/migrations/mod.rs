pub mod ledger;
mod source;
mod state;
mod statements;
mod versioning;

pub use ledger::{LedgerRow, LEDGER_TABLE};
pub use source::{MigrationSource, MigrationVersion, DOWN_SUFFIX, UP_SUFFIX};
pub use state::{LedgerEntry, VersioningState};
pub use statements::split_statements;
pub use versioning::{BatchOutcome, VersionStatus, Versioning};
