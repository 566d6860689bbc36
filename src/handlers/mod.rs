pub mod drops;
pub mod health;
pub mod jobs;
pub mod tlds;
pub mod watchlists;
