//! Auto-search item definitions.
//!
//! An item is a persistent search query plus its runtime status, the
//! weekly time window it may search in, and the download bundles it
//! has spawned.

use std::collections::BTreeSet;
use std::fmt;

use crate::search::matcher::{MatchMethod, StringMatcher};
use crate::search::services::SearchTypeResolver;

/// What to do with a matched search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ActionKind {
    /// Queue the result for download at normal priority.
    #[default]
    Download = 0,
    /// Queue the result paused.
    Queue = 1,
    /// Report the result to the hub chat without downloading.
    Report = 2,
}

impl ActionKind {
    /// Map a persisted discriminant back to an action.
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Download),
            1 => Some(Self::Queue),
            2 => Some(Self::Report),
            _ => None,
        }
    }
}

/// How the download target string is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TargetKind {
    /// A filesystem path.
    #[default]
    Path = 0,
    /// A named favorite download directory.
    Favorite = 1,
    /// A share root.
    Share = 2,
}

impl TargetKind {
    /// Map a persisted discriminant back to a target kind.
    pub fn from_repr(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Path),
            1 => Some(Self::Favorite),
            2 => Some(Self::Share),
            _ => None,
        }
    }
}

/// Runtime status of an item. The order matters: a status is only
/// upgraded forward by result handling (see the manager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ItemStatus {
    /// No match handled yet; the item participates in searches.
    #[default]
    Searching,
    /// A directory listing download has been queued.
    List,
    /// A bundle has been queued successfully.
    Queued,
    /// A queued bundle failed scanning with missing files.
    FailedMissing,
    /// A queued bundle failed scanning with extra files.
    FailedExtras,
}

/// A wall-clock time of day, minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchTime {
    pub hour: u8,
    pub minute: u8,
}

impl SearchTime {
    /// The end-of-day default, `23:59`.
    pub fn end_of_day() -> Self {
        SearchTime { hour: 23, minute: 59 }
    }

    /// Parse the `HH:MM` form. Out-of-range values are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let (h, m) = s.split_once(':')?;
        let hour = h.parse().ok()?;
        let minute = m.parse().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(SearchTime { hour, minute })
    }
}

impl fmt::Display for SearchTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// The weekday mask, index 0 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchDays([bool; 7]);

impl Default for SearchDays {
    fn default() -> Self {
        SearchDays([true; 7])
    }
}

impl SearchDays {
    /// Whether searching is allowed on the given weekday
    /// (0 = Sunday .. 6 = Saturday).
    pub fn allows(&self, weekday: usize) -> bool {
        self.0.get(weekday).copied().unwrap_or(false)
    }

    pub fn set(&mut self, weekday: usize, allowed: bool) {
        if let Some(day) = self.0.get_mut(weekday) {
            *day = allowed;
        }
    }

    /// The persisted form: 7 characters of `0`/`1`, index 0 leftmost.
    pub fn to_mask_string(&self) -> String {
        self.0.iter().map(|&d| if d { '1' } else { '0' }).collect()
    }

    /// Parse the persisted form.
    pub fn from_mask_string(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 7 {
            return None;
        }
        let mut days = [false; 7];
        for (day, &b) in days.iter_mut().zip(bytes) {
            *day = match b {
                b'1' => true,
                b'0' => false,
                _ => return None,
            };
        }
        Some(SearchDays(days))
    }
}

/// A persistent auto-search query and its runtime state.
#[derive(Debug, Clone)]
pub struct AutoSearchItem {
    /// Process-unique identifier; 0 until the manager assigns one.
    pub token: u32,
    pub enabled: bool,
    pub search_string: String,
    /// Search-type tag; single ASCII digits are the built-in types.
    pub file_type: String,
    pub action: ActionKind,
    /// Delete the item once a bundle spawned from it finishes.
    pub remove_after_completion: bool,
    pub target: String,
    pub target_kind: TargetKind,
    pub matcher: StringMatcher,
    /// Wildcard filter over the sender nick; empty accepts everyone.
    pub user_matcher: StringMatcher,
    /// Minutes between searches; 0 uses the global default.
    pub search_interval: u32,
    /// Epoch seconds after which the item is removed; 0 = never.
    pub expire_time: i64,
    pub check_already_queued: bool,
    pub check_already_shared: bool,
    /// Epoch seconds of the last emitted search.
    pub last_search: i64,
    pub search_days: SearchDays,
    pub start_time: SearchTime,
    pub end_time: SearchTime,
    pub status: ItemStatus,
    /// Tokens of download bundles spawned from this item.
    pub bundle_tokens: BTreeSet<String>,
    /// Set by a user-triggered search so the next matching result is
    /// accepted even when the item would otherwise reject new ones.
    pub manual_search_pending: bool,
}

impl AutoSearchItem {
    /// Create an item with default matcher (partial match over the
    /// search string), all weekdays and a full-day window.
    pub fn new(
        search_string: impl Into<String>,
        file_type: impl Into<String>,
        action: ActionKind,
        target: impl Into<String>,
        target_kind: TargetKind,
    ) -> Self {
        let search_string = search_string.into();
        let matcher = StringMatcher::new(MatchMethod::Partial, search_string.clone());
        AutoSearchItem {
            token: 0,
            enabled: true,
            search_string,
            file_type: file_type.into(),
            action,
            remove_after_completion: false,
            target: target.into(),
            target_kind,
            matcher,
            user_matcher: StringMatcher::wildcard(""),
            search_interval: 0,
            expire_time: 0,
            check_already_queued: false,
            check_already_shared: false,
            last_search: 0,
            search_days: SearchDays::default(),
            start_time: SearchTime::default(),
            end_time: SearchTime::end_of_day(),
            status: ItemStatus::Searching,
            bundle_tokens: BTreeSet::new(),
            manual_search_pending: false,
        }
    }

    /// Replace the matcher. An empty pattern falls back to the search
    /// string.
    pub fn with_matcher(mut self, method: MatchMethod, pattern: &str) -> Self {
        let pattern = if pattern.is_empty() {
            self.search_string.clone()
        } else {
            pattern.to_string()
        };
        self.matcher = StringMatcher::new(method, pattern);
        self
    }

    /// Set the nick filter.
    pub fn with_user_matcher(mut self, pattern: &str) -> Self {
        self.user_matcher = StringMatcher::wildcard(pattern);
        self
    }

    pub fn with_remove_after_completion(mut self, remove: bool) -> Self {
        self.remove_after_completion = remove;
        self
    }

    pub fn with_expire_time(mut self, expire_time: i64) -> Self {
        self.expire_time = expire_time;
        self
    }

    pub fn with_dedup_checks(mut self, shared: bool, queued: bool) -> Self {
        self.check_already_shared = shared;
        self.check_already_queued = queued;
        self
    }

    /// Whether the item accepts new search results.
    pub fn allow_new_items(&self) -> bool {
        if !self.enabled {
            return false;
        }
        if matches!(self.status, ItemStatus::Searching | ItemStatus::FailedMissing) {
            return true;
        }
        !self.remove_after_completion
    }

    /// Apply the item matcher to a candidate string.
    pub fn matches(&self, candidate: &str) -> bool {
        self.matcher.matches(candidate)
    }

    /// Apply the nick filter; an unset filter accepts every nick.
    pub fn matches_nick(&self, nick: &str) -> bool {
        self.user_matcher.is_empty() || self.user_matcher.matches(nick)
    }

    /// Whether the item has expired at `now` (epoch seconds).
    pub fn expired(&self, now: i64) -> bool {
        self.expire_time > 0 && self.expire_time < now
    }

    /// Whether the weekly window allows searching at the given local
    /// weekday (0 = Sunday) and time of day.
    pub fn search_window_allows(&self, weekday: usize, hour: u8, minute: u8) -> bool {
        if !self.search_days.allows(weekday) {
            return false;
        }
        if self.start_time.hour > hour || self.end_time.hour < hour {
            return false;
        }
        if self.start_time.hour == hour && self.start_time.minute > minute {
            return false;
        }
        if self.end_time.hour == hour && self.end_time.minute < minute {
            return false;
        }
        true
    }

    /// Human-readable form of the file-type tag. Built-in single-digit
    /// tags are resolved through the registry; custom tags are shown
    /// as-is.
    pub fn display_type(&self, types: &dyn SearchTypeResolver) -> String {
        let bytes = self.file_type.as_bytes();
        if bytes.len() == 1 && bytes[0].is_ascii_digit() {
            types.display_name(&self.file_type)
        } else {
            self.file_type.clone()
        }
    }

    /// Attach a bundle token.
    pub fn add_bundle(&mut self, token: impl Into<String>) {
        self.bundle_tokens.insert(token.into());
    }

    /// Detach a bundle token.
    pub fn remove_bundle(&mut self, token: &str) {
        self.bundle_tokens.remove(token);
    }

    /// Human-readable status line.
    pub fn status_string(&self) -> String {
        if !self.enabled {
            return "Disabled".to_string();
        }

        let mut searching = !self.remove_after_completion;
        let status = match self.status {
            ItemStatus::Searching => {
                searching = true;
                "Active".to_string()
            }
            ItemStatus::List => "Downloading list".to_string(),
            _ => {
                if self.bundle_tokens.len() == 1 {
                    match self.status {
                        ItemStatus::Queued => "Queued".to_string(),
                        ItemStatus::FailedMissing => {
                            searching = true;
                            "Failed (files missing)".to_string()
                        }
                        ItemStatus::FailedExtras => "Failed (extra files)".to_string(),
                        _ => String::new(),
                    }
                } else {
                    searching = true;
                    format!("{} bundles queued", self.bundle_tokens.len())
                }
            }
        };

        format!(
            "{status}, {}",
            if searching { "searching" } else { "not searching" }
        )
    }
}
