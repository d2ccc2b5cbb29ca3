mod in_memory;

pub use in_memory::{
    InMemoryMonitorRepo, InMemoryQuoteRepo, InMemoryRunRepo, InMemoryTickerRepo,
};
