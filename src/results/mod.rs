mod query_result;
mod result_set;

pub use query_result::{NextToken, QueryInfo, QueryResult};
pub use result_set::{CustomDbRow, ResultSet};
