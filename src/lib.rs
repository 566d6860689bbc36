pub mod config;
pub mod coordinator;
pub mod czds_client;
pub mod db;
pub mod drop_detector;
pub mod drop_persister;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notification;
pub mod quality;
pub mod scheduler;
pub mod watchlist_matcher;
pub mod zone_parser;
pub mod zone_store;

use std::sync::Arc;

use db::DropwatchDb;

/// State shared by the collaborator-facing HTTP surface (spec §6): the
/// `query_drops` read API and the TLD/Job/Watchlist admin CRUD. The
/// ingestion machinery itself (coordinator, scheduler, CZDS client) runs in
/// `dropwatch-scheduler`, not behind this router — this binary's job is
/// read/admin access to what that daemon has already persisted.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DropwatchDb>,
}
