//! The auto-search subsystem.
//!
//! This module provides:
//! - Persistent search items with per-item matchers and time windows
//! - The tick-driven round-robin scheduler
//! - Result matching and queue/report action routing
//! - Atomic XML persistence of the item store
//! - Collaborator seams towards the rest of the client

pub mod config;
pub mod item;
pub mod manager;
pub mod matcher;
pub mod persist;
pub mod services;

pub use config::AutoSearchConfig;
pub use item::{ActionKind, AutoSearchItem, ItemStatus, SearchDays, SearchTime, TargetKind};
pub use manager::{AutoSearchEvent, AutoSearchManager, Services, TickerHandle};
pub use matcher::{MatchMethod, StringMatcher};
pub use services::{
    ClientRegistry, DownloadQueue, HintedUser, ListingDownloader, OnlineUser, QueuePriority,
    ResultKind, SearchCategory, SearchDispatcher, SearchRequest, SearchResult, SearchType,
    SearchTypeResolver, ShareIndex, SizePolicy, TargetInfo, TargetResolver,
};
