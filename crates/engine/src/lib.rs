pub mod bulk;
pub mod engine;
pub mod error;
pub mod error_key;
pub mod error_store;
pub mod history;
pub mod projection;
pub mod row_ops;
pub mod scheduler;
pub mod schema;
pub mod source;
pub mod structural;
pub mod validator;

pub use engine::{EngineOptions, ValidationEngine};
pub use error::{EngineError, RuleError};
pub use error_key::{compute_unique_key, ErrorKey, UniqueKey};
pub use error_store::{ErrorMap, ErrorRecord, ErrorStore};
pub use history::GridState;
pub use projection::FilterView;
pub use schema::{ColumnSchema, GroupId};
pub use source::GridSource;
pub use validator::{Evaluation, RuleSet, Verdict};
