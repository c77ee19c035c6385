pub mod lookup;
pub mod pipeline;
pub mod scoring;
pub mod similar;

pub use lookup::get_by_key;
pub use pipeline::{
    search, RetrievalConfig, RetrievalTuning, SearchHit, SearchOutcome, SearchRequest,
    SearchScope, SoftWarning,
};
pub use similar::{find_similar, Reference};
