//! Protocol and scheduling constants for halyard.

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// Session ID reserved for the hub itself. No client is ever assigned it.
pub const HUB_SID: u32 = 0xffff_ffff;

/// Alphabet used for the 4-character wire form of a session ID.
pub const BASE32_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Length of a base32-encoded TTH or CID string.
pub const HASH_BASE32_LEN: usize = 39;

/// Search token used by the auto-search subsystem.
pub const AUTO_SEARCH_TOKEN: &str = "as";

/// Search token reserved for bundle self-searches; results carrying it
/// are never matched against auto-search items.
pub const BUNDLE_SEARCH_TOKEN: &str = "qa";

// =============================================================================
// Search-Type Tags
// =============================================================================

/// Generic "any file" search type.
pub const SEARCH_TYPE_ANY: &str = "0";

/// Directory search type.
pub const SEARCH_TYPE_DIRECTORY: &str = "7";

/// TTH search type.
pub const SEARCH_TYPE_TTH: &str = "8";

// =============================================================================
// Scheduling Constants
// =============================================================================

/// Default minutes between two auto-search emissions.
pub const DEFAULT_SEARCH_INTERVAL_MINS: u32 = 5;

/// Default minutes to wait after the item list has been walked through
/// before starting a new cycle.
pub const DEFAULT_RECHECK_MINS: u32 = 30;

/// Default days until a newly quick-added item expires.
pub const DEFAULT_EXPIRE_DAYS: u32 = 5;

/// Minimum delay between two writes of the item store.
pub const SAVE_DEBOUNCE: Duration = Duration::from_secs(20);

/// Quick-added search strings at or below this length are rejected.
pub const MIN_SEARCH_STRING_LEN: usize = 5;

// =============================================================================
// Persistence Constants
// =============================================================================

/// File name of the persisted item store inside the config directory.
pub const AUTOSEARCH_FILE: &str = "AutoSearch.xml";

/// Header written before the XML document (UTF-8 BOM + declaration).
pub const XML_UTF8_HEADER: &str =
    "\u{feff}<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"yes\"?>\n";
