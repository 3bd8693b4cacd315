//! Atomic XML persistence of the auto-search item store.
//!
//! Layout: an `Autosearch` root carrying the round-robin cursor in
//! `LastPosition`, a wrapper `Autosearch` child, and one `Autosearch`
//! element per item. Runtime-only state (status, bundle tokens, the
//! manual-search flag) is not persisted.
//!
//! Writes go to `<file>.tmp` first; the original is deleted and the
//! temporary renamed over it.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::constants::XML_UTF8_HEADER;
use crate::error::{Error, Result};
use crate::search::item::{
    ActionKind, AutoSearchItem, SearchDays, SearchTime, TargetKind,
};
use crate::search::matcher::MatchMethod;

/// The decoded content of a store file.
#[derive(Debug)]
pub struct LoadedStore {
    pub items: Vec<AutoSearchItem>,
    /// The persisted cursor; the caller clamps it to the item count.
    pub last_position: usize,
}

/// Serialize all items and replace the store file atomically.
pub fn save_items(
    path: &Path,
    tmp_path: &Path,
    items: &[AutoSearchItem],
    cur_pos: usize,
) -> Result<()> {
    let mut writer = Writer::new_with_indent(Vec::new(), b'\t', 1);

    let mut root = BytesStart::new("Autosearch");
    root.push_attribute(("LastPosition", cur_pos.to_string().as_str()));
    write_event(&mut writer, Event::Start(root))?;
    write_event(&mut writer, Event::Start(BytesStart::new("Autosearch")))?;

    for item in items {
        let mut el = BytesStart::new("Autosearch");
        el.push_attribute(("Enabled", bool_str(item.enabled)));
        el.push_attribute(("SearchString", item.search_string.as_str()));
        el.push_attribute(("FileType", item.file_type.as_str()));
        el.push_attribute(("Action", (item.action as u8).to_string().as_str()));
        el.push_attribute(("Remove", bool_str(item.remove_after_completion)));
        el.push_attribute(("Target", item.target.as_str()));
        el.push_attribute(("TargetType", (item.target_kind as u8).to_string().as_str()));
        el.push_attribute((
            "MatcherType",
            (item.matcher.method() as u8).to_string().as_str(),
        ));
        el.push_attribute(("MatcherString", item.matcher.pattern()));
        el.push_attribute(("SearchInterval", item.search_interval.to_string().as_str()));
        el.push_attribute(("UserMatch", item.user_matcher.pattern()));
        el.push_attribute(("ExpireTime", item.expire_time.to_string().as_str()));
        el.push_attribute(("CheckAlreadyQueued", bool_str(item.check_already_queued)));
        el.push_attribute(("CheckAlreadyShared", bool_str(item.check_already_shared)));
        el.push_attribute(("SearchDays", item.search_days.to_mask_string().as_str()));
        el.push_attribute(("StartTime", item.start_time.to_string().as_str()));
        el.push_attribute(("EndTime", item.end_time.to_string().as_str()));
        el.push_attribute(("LastSearchTime", item.last_search.to_string().as_str()));
        el.push_attribute(("Token", item.token.to_string().as_str()));
        write_event(&mut writer, Event::Empty(el))?;
    }

    write_event(&mut writer, Event::End(BytesEnd::new("Autosearch")))?;
    write_event(&mut writer, Event::End(BytesEnd::new("Autosearch")))?;

    let mut content = XML_UTF8_HEADER.as_bytes().to_vec();
    content.extend_from_slice(&writer.into_inner());
    content.push(b'\n');

    fs::write(tmp_path, &content)?;
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

/// Read and decode a store file.
pub fn load_items(path: &Path) -> Result<LoadedStore> {
    let content = fs::read_to_string(path)?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

    let mut reader = Reader::from_str(content);
    let mut depth = 0usize;
    let mut last_position = 0usize;
    let mut items = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::Persistence {
                message: format!("malformed store: {e}"),
            })?;
        match event {
            Event::Start(e) => {
                if e.name().as_ref() == b"Autosearch" {
                    match depth {
                        0 => {
                            let attrs = collect_attrs(&e)?;
                            last_position = attrs
                                .get("LastPosition")
                                .and_then(|v| v.parse().ok())
                                .unwrap_or(0);
                        }
                        2 => items.push(item_from_attrs(&collect_attrs(&e)?)),
                        _ => {}
                    }
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if depth == 2 && e.name().as_ref() == b"Autosearch" {
                    items.push(item_from_attrs(&collect_attrs(&e)?));
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(LoadedStore {
        items,
        last_position,
    })
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer.write_event(event).map_err(|e| Error::Persistence {
        message: format!("failed to serialize store: {e}"),
    })
}

fn bool_str(v: bool) -> &'static str {
    if v {
        "1"
    } else {
        "0"
    }
}

fn collect_attrs(el: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    for attr in el.attributes() {
        let attr = attr.map_err(|e| Error::Persistence {
            message: format!("malformed attribute: {e}"),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::Persistence {
                message: format!("malformed attribute value: {e}"),
            })?
            .into_owned();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn item_from_attrs(attrs: &HashMap<String, String>) -> AutoSearchItem {
    let get = |name: &str| attrs.get(name).map(String::as_str).unwrap_or_default();
    let get_bool = |name: &str| get(name) == "1";

    let action = get("Action")
        .parse()
        .ok()
        .and_then(ActionKind::from_repr)
        .unwrap_or_default();
    let target_kind = get("TargetType")
        .parse()
        .ok()
        .and_then(TargetKind::from_repr)
        .unwrap_or_default();
    let method = get("MatcherType")
        .parse()
        .ok()
        .and_then(MatchMethod::from_repr)
        .unwrap_or_default();

    let mut item = AutoSearchItem::new(
        get("SearchString"),
        get("FileType"),
        action,
        get("Target"),
        target_kind,
    )
    .with_matcher(method, get("MatcherString"))
    .with_user_matcher(get("UserMatch"));

    item.enabled = get_bool("Enabled");
    item.remove_after_completion = get_bool("Remove");
    item.check_already_queued = get_bool("CheckAlreadyQueued");
    item.check_already_shared = get_bool("CheckAlreadyShared");
    item.search_interval = get("SearchInterval").parse().unwrap_or(0);
    item.expire_time = get("ExpireTime").parse().unwrap_or(0);
    item.last_search = get("LastSearchTime").parse().unwrap_or(0);
    item.token = get("Token").parse().unwrap_or(0);
    item.search_days = SearchDays::from_mask_string(get("SearchDays")).unwrap_or_default();
    item.start_time = SearchTime::parse(get("StartTime")).unwrap_or_default();
    item.end_time = SearchTime::parse(get("EndTime")).unwrap_or_else(SearchTime::end_of_day);
    item
}
