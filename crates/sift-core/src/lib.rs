pub mod error;
pub mod filter;
pub mod index;
pub mod query;
pub mod store;
pub mod value;

pub use error::SiftError;
pub use filter::{ComparisonOperator, Filter, FilterItem};
pub use index::{Index, IndexRecord, IndexedFieldRecord};
pub use query::QueryClient;
pub use store::{EntityStore, StoreParams};
pub use value::{get_value_at_path, IndexKey, PrimaryKey};
