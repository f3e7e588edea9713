//! LEADERBOARD SCRAPER
//! Pages through a ranked leaderboard API and files every entrant into rank buckets on disk.
//! A run can be stopped and resumed at any point without losing or duplicating pages.

mod error;
mod macros;
mod persist;

pub mod bucket;
pub mod checkpoint;
pub mod config;
pub mod parse;
pub mod process;
pub mod request;
pub mod shutdown;

pub use error::{Error, Result};

pub const ENDPOINT: &str = "api/leaderboard/top/";
pub const DEFAULT_PAGE_COUNT: u32 = 400;
pub const DEFAULT_BUCKET_SIZE: u64 = 1000;
const BUCKET_FILE: &str = "data.json";
const CHECKPOINT_FILE: &str = "last.json";
/// Probed in this order to find a record's identifier.
pub const IDENTIFIER_FIELDS: &[&str] = &[
    "id",
    "profile_id",
    "user_id",
    "player_id",
    "profileId",
    "playerId",
    "id_str",
];
/// Fields that change between observations and are not stored.
pub const VOLATILE_FIELDS: &[&str] = &["history"];
