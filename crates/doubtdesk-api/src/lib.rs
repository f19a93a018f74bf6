pub mod auth;
pub mod authz;
pub mod comments;
pub mod counts;
pub mod doubts;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod rate_limit;
pub mod rows;
pub mod storage;
pub mod tree;

#[cfg(test)]
pub(crate) mod testing;
