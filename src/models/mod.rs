pub mod drop_record;
pub mod job;
pub mod tld;
pub mod watchlist;
pub mod zone_snapshot;
