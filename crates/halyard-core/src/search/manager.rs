//! The auto-search manager.
//!
//! Owns the item list, drives the time-windowed round-robin scheduler
//! from clock ticks, matches incoming search results against items and
//! routes the configured actions to the queue and listing
//! collaborators.
//!
//! Locking discipline: the item list lives under one `RwLock`, tick
//! bookkeeping under a `Mutex`. Neither lock is held across a
//! collaborator call or an event emission; status mutations take the
//! write lock only for the assignment and fire afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, Timelike};
use rand::Rng;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::constants::{
    AUTO_SEARCH_TOKEN, BUNDLE_SEARCH_TOKEN, MIN_SEARCH_STRING_LEN, SAVE_DEBOUNCE,
    SEARCH_TYPE_ANY, SEARCH_TYPE_DIRECTORY, SEARCH_TYPE_TTH,
};
use crate::error::{Error, Result};
use crate::search::config::AutoSearchConfig;
use crate::search::item::{ActionKind, AutoSearchItem, ItemStatus, TargetKind};
use crate::search::persist;
use crate::search::services::{
    ClientRegistry, DownloadQueue, ListingDownloader, QueuePriority, ResultKind, SearchCategory,
    SearchDispatcher, SearchRequest, SearchResult, SearchType, SearchTypeResolver, ShareIndex,
    SizePolicy, TargetResolver,
};

/// Notifications emitted on item mutations. Subscribers receive owned
/// snapshots and must not block.
#[derive(Debug, Clone)]
pub enum AutoSearchEvent {
    ItemAdded(AutoSearchItem),
    ItemUpdated(AutoSearchItem),
    /// Carries the removed item's search string.
    ItemRemoved(String),
}

/// The collaborator set the manager talks to.
#[derive(Clone)]
pub struct Services {
    pub search: Arc<dyn SearchDispatcher>,
    pub clients: Arc<dyn ClientRegistry>,
    pub share: Arc<dyn ShareIndex>,
    pub queue: Arc<dyn DownloadQueue>,
    pub listings: Arc<dyn ListingDownloader>,
    pub targets: Arc<dyn TargetResolver>,
    pub search_types: Arc<dyn SearchTypeResolver>,
}

/// Items plus the round-robin cursor, guarded together.
struct ItemList {
    items: Vec<AutoSearchItem>,
    cur_pos: usize,
}

/// Minute/second tick bookkeeping.
struct TickState {
    /// Minutes since the last emitted search.
    last_search_age: u32,
    /// Set when a full cycle completed; searching pauses until the
    /// recheck delay has passed.
    end_reached: bool,
    /// Minutes since the end of the list was reached.
    recheck_age: u32,
    /// Seconds since the last store write.
    save_age_secs: u64,
}

/// The auto-search scheduler and match engine.
pub struct AutoSearchManager {
    services: Services,
    config: AutoSearchConfig,
    list: RwLock<ItemList>,
    tick: Mutex<TickState>,
    dirty: AtomicBool,
    events: broadcast::Sender<AutoSearchEvent>,
}

impl AutoSearchManager {
    /// Create a manager. The first search fires roughly two minutes
    /// after startup rather than waiting a full interval.
    pub fn new(services: Services, config: AutoSearchConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        let last_search_age = config.search_interval_mins.saturating_sub(2);
        AutoSearchManager {
            services,
            config,
            list: RwLock::new(ItemList {
                items: Vec::new(),
                cur_pos: 0,
            }),
            tick: Mutex::new(TickState {
                last_search_age,
                end_reached: false,
                recheck_age: 0,
                save_age_secs: 0,
            }),
            dirty: AtomicBool::new(false),
            events,
        }
    }

    /// Subscribe to item mutation events.
    pub fn subscribe(&self) -> broadcast::Receiver<AutoSearchEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &AutoSearchConfig {
        &self.config
    }

    // =========================================================================
    // Item access
    // =========================================================================

    /// Number of items.
    pub fn len(&self) -> usize {
        self.read_list().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_list().items.is_empty()
    }

    /// Snapshot of all items in insertion order.
    pub fn items(&self) -> Vec<AutoSearchItem> {
        self.read_list().items.clone()
    }

    /// Snapshot of the item at `index`.
    pub fn item_at(&self, index: usize) -> Option<AutoSearchItem> {
        self.read_list().items.get(index).cloned()
    }

    /// Snapshot of the item with the given token.
    pub fn item_by_token(&self, token: u32) -> Option<AutoSearchItem> {
        self.read_list()
            .items
            .iter()
            .find(|i| i.token == token)
            .cloned()
    }

    /// Add an item. A zero token gets a fresh process-unique one; a
    /// duplicate search string is rejected.
    pub fn add(&self, mut item: AutoSearchItem) -> Result<AutoSearchItem> {
        let stored = {
            let mut list = self.write_list();
            if list
                .items
                .iter()
                .any(|i| i.search_string == item.search_string)
            {
                return Err(Error::DuplicateItem(item.search_string));
            }
            if item.token == 0 {
                item.token = unique_token(&list.items);
            }
            list.items.push(item.clone());
            item
        };
        self.dirty.store(true, Ordering::SeqCst);
        self.emit(AutoSearchEvent::ItemAdded(stored.clone()));
        Ok(stored)
    }

    /// Quick-add used by "download this later" style UI actions.
    ///
    /// Builds an item with defaults, expiry per config, and searches
    /// immediately when any hub is online.
    pub fn add_simple(
        &self,
        search_string: &str,
        target: &str,
        target_kind: TargetKind,
        is_directory: bool,
        remove_after_completion: bool,
    ) -> Result<AutoSearchItem> {
        if search_string.len() <= MIN_SEARCH_STRING_LEN {
            error!(
                "Autosearch: failed to add {search_string}: line empty or too short"
            );
            return Err(Error::InvalidItem {
                message: "line empty or too short".into(),
            });
        }

        let now = Local::now().timestamp();
        let expire_time = if self.config.expire_days > 0 {
            now + i64::from(self.config.expire_days) * 24 * 60 * 60
        } else {
            0
        };

        let file_type = if is_directory {
            SEARCH_TYPE_DIRECTORY
        } else {
            SEARCH_TYPE_ANY
        };
        let item = AutoSearchItem::new(
            search_string,
            file_type,
            ActionKind::Download,
            target,
            target_kind,
        )
        .with_remove_after_completion(remove_after_completion)
        .with_expire_time(expire_time);

        let item = match self.add(item) {
            Ok(item) => item,
            Err(err) => {
                error!("Autosearch: failed to add {search_string}: item name exists");
                return Err(err);
            }
        };
        self.touch_last_search(item.token, now);

        let hubs = self.services.clients.online_hubs();
        if hubs.is_empty() {
            info!("Autosearch: {search_string} has been added to the list");
        } else {
            let delay = self.search_item(&item, &hubs, false, SearchCategory::Auto);
            if delay == 0 {
                info!(
                    "Autosearch: {search_string} has been added to the list and searched for"
                );
            } else {
                info!(
                    "Autosearch: {search_string} has been added to the list, search in {} seconds",
                    delay / 1000
                );
            }
        }

        Ok(item)
    }

    /// Replace the item at `index`. The new search string must not
    /// collide with any other item.
    pub fn update_at(&self, index: usize, item: AutoSearchItem) -> Result<()> {
        let updated = {
            let mut list = self.write_list();
            if index >= list.items.len() {
                return Err(Error::InvalidItem {
                    message: format!("no item at index {index}"),
                });
            }
            if list
                .items
                .iter()
                .enumerate()
                .any(|(i, existing)| i != index && existing.search_string == item.search_string)
            {
                return Err(Error::DuplicateItem(item.search_string));
            }
            list.items[index] = item.clone();
            item
        };
        self.dirty.store(true, Ordering::SeqCst);
        self.emit(AutoSearchEvent::ItemUpdated(updated));
        Ok(())
    }

    /// Remove the item with the given token. Removing an item before
    /// the cursor pulls the cursor back so no unvisited item is
    /// skipped this cycle.
    pub fn remove_by_token(&self, token: u32) -> bool {
        let removed = {
            let mut list = self.write_list();
            let Some(index) = list.items.iter().position(|i| i.token == token) else {
                return false;
            };
            if index < list.cur_pos {
                list.cur_pos -= 1;
            }
            list.items.remove(index)
        };
        self.dirty.store(true, Ordering::SeqCst);
        self.emit(AutoSearchEvent::ItemRemoved(removed.search_string));
        true
    }

    // =========================================================================
    // Status and bundle lifecycle
    // =========================================================================

    /// Assign a status and notify.
    pub fn set_item_status(&self, token: u32, status: ItemStatus) {
        let updated = {
            let mut list = self.write_list();
            let Some(item) = list.items.iter_mut().find(|i| i.token == token) else {
                return;
            };
            item.status = status;
            item.clone()
        };
        self.emit(AutoSearchEvent::ItemUpdated(updated));
    }

    /// Assign a status only if it moves the item forward.
    fn upgrade_item_status(&self, token: u32, status: ItemStatus) {
        let updated = {
            let mut list = self.write_list();
            let Some(item) = list.items.iter_mut().find(|i| i.token == token) else {
                return;
            };
            if item.status >= status {
                return;
            }
            item.status = status;
            item.clone()
        };
        self.emit(AutoSearchEvent::ItemUpdated(updated));
    }

    /// A bundle spawned from an item has been queued.
    pub fn on_bundle_added(&self, item_token: u32, bundle_token: &str) {
        let updated = {
            let mut list = self.write_list();
            let Some(item) = list.items.iter_mut().find(|i| i.token == item_token) else {
                return;
            };
            item.add_bundle(bundle_token);
            item.status = ItemStatus::Queued;
            item.clone()
        };
        self.emit(AutoSearchEvent::ItemUpdated(updated));
    }

    /// A bundle has left the queue. A finished bundle removes the item
    /// when it was marked for removal after completion.
    pub fn on_bundle_removed(&self, item_token: u32, bundle_token: &str, finished: bool) {
        let updated = {
            let mut list = self.write_list();
            let Some(item) = list.items.iter_mut().find(|i| i.token == item_token) else {
                return;
            };
            item.remove_bundle(bundle_token);
            item.clone()
        };
        let remove = updated.remove_after_completion && finished;
        let token = updated.token;
        self.emit(AutoSearchEvent::ItemUpdated(updated));
        if remove {
            self.remove_by_token(token);
        }
    }

    /// A queued bundle failed its content scan.
    pub fn on_bundle_scan_failed(&self, item_token: u32, no_missing_files: bool) {
        let status = if no_missing_files {
            ItemStatus::FailedExtras
        } else {
            ItemStatus::FailedMissing
        };
        self.set_item_status(item_token, status);
    }

    /// Bundle tokens of an item paired with their queue display names.
    pub fn bundle_info(&self, item_token: u32) -> Vec<(String, String)> {
        let tokens: Vec<String> = {
            let list = self.read_list();
            match list.items.iter().find(|i| i.token == item_token) {
                Some(item) => item.bundle_tokens.iter().cloned().collect(),
                None => return Vec::new(),
            }
        };
        tokens
            .into_iter()
            .map(|t| {
                let name = self.services.queue.bundle_name(&t);
                (t, name)
            })
            .collect()
    }

    /// A search type was renamed; rewrite items referring to it.
    pub fn on_search_type_renamed(&self, old_name: &str, new_name: &str) {
        let updated: Vec<AutoSearchItem> = {
            let mut list = self.write_list();
            list.items
                .iter_mut()
                .filter(|i| i.file_type == old_name)
                .map(|i| {
                    i.file_type = new_name.to_string();
                    i.clone()
                })
                .collect()
        };
        for item in updated {
            self.emit(AutoSearchEvent::ItemUpdated(item));
        }
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Coarse 1-second tick: flushes the store when dirty, at most
    /// once per debounce window.
    pub fn on_second_tick(&self) {
        {
            let mut tick = self.lock_tick();
            tick.save_age_secs += 1;
            if !self.dirty.load(Ordering::SeqCst) || tick.save_age_secs < SAVE_DEBOUNCE.as_secs() {
                return;
            }
            tick.save_age_secs = 0;
        }
        self.dirty.store(false, Ordering::SeqCst);
        if let Err(err) = self.save() {
            // Keep the flag so the next window retries the write.
            debug!(%err, "Failed to save auto-search store");
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    /// 1-minute tick at the current local time.
    pub fn on_minute_tick(&self) {
        self.on_minute_tick_at(Local::now());
    }

    /// 1-minute tick at an explicit timestamp.
    pub fn on_minute_tick_at(&self, now: DateTime<Local>) {
        let (reset_cursor, eligible) = {
            let mut tick = self.lock_tick();
            tick.last_search_age += 1;

            let mut reset_cursor = false;
            if tick.end_reached {
                tick.recheck_age += 1;
                if tick.recheck_age < self.config.recheck_mins {
                    return;
                }
                tick.end_reached = false;
                reset_cursor = true;
            }
            (
                reset_cursor,
                tick.last_search_age >= self.config.search_interval_mins,
            )
        };
        if reset_cursor {
            self.write_list().cur_pos = 0;
        }
        if !eligible {
            return;
        }

        if !self.collect_expired_and_check_enabled(now.timestamp()) {
            return;
        }
        self.check_searches(now);
    }

    /// Drop expired items and report whether any enabled item remains.
    /// Resets the cursor when the list is empty or fully disabled so a
    /// new cycle starts from the beginning.
    fn collect_expired_and_check_enabled(&self, now_epoch: i64) -> bool {
        let mut expired: Vec<(u32, String)> = Vec::new();
        let mut any_enabled = false;
        {
            let list = self.read_list();
            if list.items.is_empty() {
                drop(list);
                self.write_list().cur_pos = 0;
                return false;
            }
            for item in &list.items {
                if item.expired(now_epoch) {
                    expired.push((item.token, item.search_string.clone()));
                } else if item.enabled {
                    any_enabled = true;
                }
            }
        }

        for (token, search_string) in expired {
            info!("An expired autosearch has been removed: {search_string}");
            self.remove_by_token(token);
        }

        if !any_enabled {
            self.write_list().cur_pos = 0;
        }
        any_enabled
    }

    /// Walk the list from the cursor and run the first eligible item.
    fn check_searches(&self, now: DateTime<Local>) {
        let hubs = self.services.clients.online_hubs();
        if hubs.is_empty() {
            return;
        }

        let weekday = now.weekday().num_days_from_sunday() as usize;
        let hour = now.hour() as u8;
        let minute = now.minute() as u8;

        let mut reached_end = false;
        let selected = {
            let mut list = self.write_list();
            if list.cur_pos >= list.items.len() {
                list.cur_pos = 0;
                reached_end = true;
                None
            } else {
                let mut selected = None;
                for i in list.cur_pos..list.items.len() {
                    // Advance past skipped items too; they are not
                    // revisited until the list has gone through.
                    list.cur_pos += 1;
                    let item = &mut list.items[i];
                    if !item.allow_new_items() {
                        continue;
                    }
                    if !item.search_window_allows(weekday, hour, minute) {
                        continue;
                    }
                    item.last_search = now.timestamp();
                    selected = Some(item.clone());
                    break;
                }
                selected
            }
        };

        if reached_end {
            info!(
                "Autosearch: End of list reached. Recheck Items, next search after {} minutes",
                self.config.recheck_mins
            );
            let mut tick = self.lock_tick();
            tick.end_reached = true;
            tick.recheck_age = 0;
            return;
        }

        if let Some(item) = selected {
            self.lock_tick().last_search_age = 0;
            self.emit(AutoSearchEvent::ItemUpdated(item.clone()));
            self.search_item(&item, &hubs, true, SearchCategory::Auto);
        }
    }

    /// Search an item immediately on behalf of the user, bypassing the
    /// window and enable checks. Returns false when no hub is online.
    pub fn manual_search(&self, token: u32) -> bool {
        let hubs = self.services.clients.online_hubs();
        if hubs.is_empty() {
            return false;
        }
        let item = {
            let mut list = self.write_list();
            let Some(item) = list.items.iter_mut().find(|i| i.token == token) else {
                return false;
            };
            item.manual_search_pending = true;
            item.clone()
        };
        self.search_item(&item, &hubs, true, SearchCategory::Manual);
        true
    }

    /// Resolve the item's type and hand the query to the search
    /// service. An unresolvable type resets the item to the generic
    /// type and the search proceeds as a generic one.
    fn search_item(
        &self,
        item: &AutoSearchItem,
        hubs: &[String],
        report: bool,
        category: SearchCategory,
    ) -> u64 {
        let search_type = match self.services.search_types.resolve(&item.file_type) {
            Ok(st) => st,
            Err(_) => {
                self.reset_file_type(item.token);
                SearchType::default()
            }
        };

        let delay = self.services.search.search(
            hubs,
            SearchRequest {
                query: item.search_string.clone(),
                size: 0,
                mode: search_type.mode,
                size_policy: SizePolicy::DontCare,
                token: AUTO_SEARCH_TOKEN.to_string(),
                extensions: search_type.extensions,
                category,
            },
        );

        if report {
            if delay == 0 {
                info!("Autosearch: {} has been searched for", item.search_string);
            } else {
                info!(
                    "Autosearch: {} will be searched for in {} seconds",
                    item.search_string,
                    delay / 1000
                );
            }
        }
        delay
    }

    fn reset_file_type(&self, token: u32) {
        let mut list = self.write_list();
        if let Some(item) = list.items.iter_mut().find(|i| i.token == token) {
            item.file_type = SEARCH_TYPE_ANY.to_string();
        }
    }

    fn touch_last_search(&self, token: u32, now_epoch: i64) {
        let mut list = self.write_list();
        if let Some(item) = list.items.iter_mut().find(|i| i.token == token) {
            item.last_search = now_epoch;
        }
    }

    // =========================================================================
    // Result matching
    // =========================================================================

    /// Match an incoming search result against all items and run the
    /// action of every match.
    pub fn on_search_result(&self, result: &SearchResult) {
        // Bundle self-searches are never matched.
        if result.token == BUNDLE_SEARCH_TOKEN {
            return;
        }

        let candidates: Vec<AutoSearchItem> = {
            let mut list = self.write_list();
            let mut matched = Vec::new();
            for item in &mut list.items {
                if !item.allow_new_items() && !item.manual_search_pending {
                    continue;
                }
                item.manual_search_pending = false;

                if item.file_type == SEARCH_TYPE_TTH {
                    if !item.matches(&result.tth) {
                        continue;
                    }
                } else {
                    if item.file_type == SEARCH_TYPE_DIRECTORY
                        && result.kind != ResultKind::Directory
                    {
                        continue;
                    }
                    let candidate = match result.kind {
                        ResultKind::Directory => result.last_directory(),
                        ResultKind::File => result.file_name(),
                    };
                    if !item.matches(candidate) {
                        continue;
                    }
                }

                matched.push(item.clone());
            }
            matched
        };

        for item in candidates {
            if !item.user_matcher.is_empty() {
                let nicks = self.services.clients.nicks(&result.cid, &result.hub_url);
                if !nicks.iter().any(|n| item.matches_nick(n)) {
                    continue;
                }
            }
            self.handle_action(result, &item);
        }
    }

    /// Run one matched item's action. Queue failures are swallowed so
    /// the remaining matches still run.
    fn handle_action(&self, result: &SearchResult, item: &AutoSearchItem) {
        match item.action {
            ActionKind::Download | ActionKind::Queue => {
                if item.file_type == SEARCH_TYPE_DIRECTORY {
                    let dir = result.last_directory();
                    if item.check_already_shared && self.services.share.is_dir_shared(dir) {
                        return;
                    }
                    if item.check_already_queued && self.services.queue.is_dir_queued(dir) {
                        return;
                    }
                }

                let priority = if item.action == ActionKind::Queue {
                    QueuePriority::Paused
                } else {
                    QueuePriority::Default
                };
                let user = result.user();

                let outcome = match result.kind {
                    ResultKind::Directory => self
                        .services
                        .listings
                        .add_directory_download(
                            &result.path,
                            &user,
                            &item.target,
                            item.target_kind,
                            priority,
                            item.token,
                        )
                        .map(|()| self.upgrade_item_status(item.token, ItemStatus::List)),
                    ResultKind::File => {
                        let (info, has_space) = self.services.targets.virtual_target(
                            &item.target,
                            item.target_kind,
                            result.size,
                        );
                        if !has_space {
                            self.services
                                .targets
                                .report_insufficient_size(&info, result.size);
                        }
                        let target = format!("{}{}", info.target_dir, result.file_name());
                        self.services
                            .queue
                            .add_file(
                                &target,
                                result.size,
                                &result.tth,
                                &user,
                                &result.path,
                                priority,
                                item.token,
                            )
                            .map(|()| self.set_item_status(item.token, ItemStatus::Queued))
                    }
                };
                if let Err(err) = outcome {
                    debug!(%err, path = %result.path, "Autosearch failed to queue result");
                }
            }
            ActionKind::Report => {
                let Some(user) = self
                    .services
                    .clients
                    .find_online_user(&result.cid, &result.hub_url)
                else {
                    return;
                };
                if user.connected {
                    self.services.clients.hub_message(
                        &result.hub_url,
                        &format!(
                            "AutoSearch found a file: {} from an user {}",
                            result.path, user.nick
                        ),
                    );
                }
                if item.remove_after_completion {
                    self.remove_by_token(item.token);
                }
            }
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the item store now, regardless of the dirty flag.
    pub fn save(&self) -> Result<()> {
        let (items, cur_pos) = {
            let list = self.read_list();
            (list.items.clone(), list.cur_pos)
        };
        persist::save_items(
            &self.config.store_path(),
            &self.config.store_tmp_path(),
            &items,
            cur_pos,
        )
    }

    /// Load the item store from disk. Missing or unreadable stores are
    /// debug-logged and leave the manager empty; duplicate search
    /// strings within the store are dropped.
    pub fn load(&self) {
        let store = match persist::load_items(&self.config.store_path()) {
            Ok(store) => store,
            Err(err) => {
                debug!(%err, "No auto-search store loaded");
                return;
            }
        };

        for item in store.items {
            let search_string = item.search_string.clone();
            if let Err(err) = self.add(item) {
                debug!(%err, %search_string, "Skipping persisted item");
            }
        }

        let mut list = self.write_list();
        list.cur_pos = if store.last_position < list.items.len() {
            store.last_position
        } else {
            0
        };
    }

    // =========================================================================
    // Driver
    // =========================================================================

    /// Spawn the tokio tick driver. The returned handle stops it.
    pub fn spawn_ticker(self: &Arc<Self>) -> TickerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            let mut second =
                tokio::time::interval_at(start + Duration::from_secs(1), Duration::from_secs(1));
            let mut minute =
                tokio::time::interval_at(start + Duration::from_secs(60), Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = second.tick() => manager.on_second_tick(),
                    _ = minute.tick() => manager.on_minute_tick(),
                }
            }
        });

        TickerHandle { task, shutdown_tx }
    }

    // =========================================================================
    // Lock helpers
    // =========================================================================

    fn read_list(&self) -> RwLockReadGuard<'_, ItemList> {
        self.list.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_list(&self) -> RwLockWriteGuard<'_, ItemList> {
        self.list.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tick(&self) -> std::sync::MutexGuard<'_, TickState> {
        self.tick.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: AutoSearchEvent) {
        // No receivers is fine; events are best-effort notifications.
        let _ = self.events.send(event);
    }

    #[cfg(test)]
    fn cursor(&self) -> usize {
        self.read_list().cur_pos
    }
}

/// Handle of a running tick driver.
pub struct TickerHandle {
    task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl TickerHandle {
    /// Stop the driver and wait for it to wind down.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if !self.task.is_finished() {
            let _ = self.task.await;
        }
    }
}

/// Draw a nonzero token that no existing item uses.
fn unique_token(items: &[AutoSearchItem]) -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let candidate: u32 = rng.gen();
        if candidate != 0 && !items.iter().any(|i| i.token == candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::services::OnlineUser;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    // Fake collaborators recording every call.

    #[derive(Default)]
    struct FakeSearch {
        delay: u64,
        requests: StdMutex<Vec<SearchRequest>>,
    }

    impl SearchDispatcher for FakeSearch {
        fn search(&self, _hubs: &[String], request: SearchRequest) -> u64 {
            self.requests.lock().unwrap().push(request);
            self.delay
        }
    }

    struct FakeClients {
        hubs: Vec<String>,
        nicks: Vec<String>,
        online_user: Option<OnlineUser>,
        messages: StdMutex<Vec<(String, String)>>,
    }

    impl Default for FakeClients {
        fn default() -> Self {
            FakeClients {
                hubs: vec!["adc://hub:1511".to_string()],
                nicks: vec!["alice".to_string()],
                online_user: None,
                messages: StdMutex::new(Vec::new()),
            }
        }
    }

    impl ClientRegistry for FakeClients {
        fn online_hubs(&self) -> Vec<String> {
            self.hubs.clone()
        }

        fn nicks(&self, _cid: &str, _hub_url: &str) -> Vec<String> {
            self.nicks.clone()
        }

        fn find_online_user(&self, _cid: &str, _hub_url: &str) -> Option<OnlineUser> {
            self.online_user.clone()
        }

        fn hub_message(&self, hub_url: &str, message: &str) {
            self.messages
                .lock()
                .unwrap()
                .push((hub_url.to_string(), message.to_string()));
        }
    }

    #[derive(Default)]
    struct FakeShare {
        shared: HashSet<String>,
    }

    impl ShareIndex for FakeShare {
        fn is_dir_shared(&self, name: &str) -> bool {
            self.shared.contains(name)
        }
    }

    #[derive(Default)]
    struct FakeQueue {
        queued_dirs: HashSet<String>,
        fail_add: bool,
        files: StdMutex<Vec<String>>,
    }

    impl DownloadQueue for FakeQueue {
        fn is_dir_queued(&self, name: &str) -> bool {
            self.queued_dirs.contains(name)
        }

        fn add_file(
            &self,
            target: &str,
            _size: i64,
            _tth: &str,
            _user: &crate::search::services::HintedUser,
            _remote_path: &str,
            _priority: QueuePriority,
            _item_token: u32,
        ) -> crate::Result<()> {
            if self.fail_add {
                return Err(Error::Queue {
                    message: "target exists".into(),
                });
            }
            self.files.lock().unwrap().push(target.to_string());
            Ok(())
        }

        fn bundle_name(&self, bundle_token: &str) -> String {
            format!("bundle {bundle_token}")
        }
    }

    #[derive(Default)]
    struct FakeListings {
        downloads: StdMutex<Vec<(String, QueuePriority)>>,
    }

    impl ListingDownloader for FakeListings {
        fn add_directory_download(
            &self,
            remote_dir: &str,
            _user: &crate::search::services::HintedUser,
            _target: &str,
            _target_kind: TargetKind,
            priority: QueuePriority,
            _item_token: u32,
        ) -> crate::Result<()> {
            self.downloads
                .lock()
                .unwrap()
                .push((remote_dir.to_string(), priority));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeTargets;

    impl TargetResolver for FakeTargets {
        fn virtual_target(
            &self,
            _target: &str,
            _kind: TargetKind,
            _size: i64,
        ) -> (crate::search::services::TargetInfo, bool) {
            (
                crate::search::services::TargetInfo {
                    target_dir: "/dl/".to_string(),
                },
                true,
            )
        }

        fn report_insufficient_size(
            &self,
            _info: &crate::search::services::TargetInfo,
            _size: i64,
        ) {
        }
    }

    #[derive(Default)]
    struct FakeTypes;

    impl SearchTypeResolver for FakeTypes {
        fn resolve(&self, tag: &str) -> crate::Result<SearchType> {
            if tag.len() == 1 && tag.as_bytes()[0].is_ascii_digit() {
                Ok(SearchType {
                    mode: i32::from(tag.as_bytes()[0] - b'0'),
                    extensions: Vec::new(),
                })
            } else {
                Err(Error::SearchTypeUnknown(tag.to_string()))
            }
        }
    }

    struct Fixture {
        manager: Arc<AutoSearchManager>,
        search: Arc<FakeSearch>,
        clients: Arc<FakeClients>,
        queue: Arc<FakeQueue>,
        listings: Arc<FakeListings>,
    }

    fn fixture() -> Fixture {
        fixture_with(FakeClients::default(), FakeShare::default(), FakeQueue::default())
    }

    fn fixture_with(clients: FakeClients, share: FakeShare, queue: FakeQueue) -> Fixture {
        let search = Arc::new(FakeSearch::default());
        let clients = Arc::new(clients);
        let queue = Arc::new(queue);
        let listings = Arc::new(FakeListings::default());
        let services = Services {
            search: search.clone(),
            clients: clients.clone(),
            share: Arc::new(share),
            queue: queue.clone(),
            listings: listings.clone(),
            targets: Arc::new(FakeTargets),
            search_types: Arc::new(FakeTypes),
        };
        let config = AutoSearchConfig::new()
            .with_search_interval_mins(1)
            .with_recheck_mins(3);
        Fixture {
            manager: Arc::new(AutoSearchManager::new(services, config)),
            search,
            clients,
            queue,
            listings,
        }
    }

    fn item(search_string: &str) -> AutoSearchItem {
        AutoSearchItem::new(
            search_string,
            SEARCH_TYPE_ANY,
            ActionKind::Download,
            "/downloads",
            TargetKind::Path,
        )
    }

    fn noon(day: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 7, day, 12, 0, 0).unwrap()
    }

    fn result(path: &str, kind: ResultKind) -> SearchResult {
        SearchResult {
            cid: "CID".into(),
            hub_url: "adc://hub:1511".into(),
            path: path.into(),
            size: 100,
            tth: "A".repeat(39),
            kind,
            token: "as".into(),
        }
    }

    #[test]
    fn add_assigns_unique_tokens() {
        let f = fixture();
        let a = f.manager.add(item("first item")).unwrap();
        let b = f.manager.add(item("second item")).unwrap();
        assert_ne!(a.token, 0);
        assert_ne!(b.token, 0);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn add_rejects_duplicate_search_string() {
        let f = fixture();
        f.manager.add(item("the same string")).unwrap();
        let err = f.manager.add(item("the same string")).unwrap_err();
        assert!(matches!(err, Error::DuplicateItem(_)));
        assert_eq!(f.manager.len(), 1);
    }

    #[test]
    fn update_rejects_collision_with_other_item() {
        let f = fixture();
        f.manager.add(item("first item")).unwrap();
        f.manager.add(item("second item")).unwrap();

        // renaming the second to the first's string fails
        let err = f.manager.update_at(1, item("first item")).unwrap_err();
        assert!(matches!(err, Error::DuplicateItem(_)));

        // keeping its own string is fine
        f.manager.update_at(1, item("second item")).unwrap();
    }

    #[test]
    fn add_simple_rejects_short_strings() {
        let f = fixture();
        let err = f
            .manager
            .add_simple("short", "/dl", TargetKind::Path, false, true)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidItem { .. }));
    }

    #[test]
    fn add_simple_searches_immediately() {
        let f = fixture();
        let added = f
            .manager
            .add_simple("ubuntu iso", "/dl", TargetKind::Path, false, true)
            .unwrap();
        assert!(added.expire_time > 0);
        assert_eq!(f.search.requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn events_fire_on_mutations() {
        let f = fixture();
        let mut rx = f.manager.subscribe();
        let added = f.manager.add(item("event test")).unwrap();
        f.manager.set_item_status(added.token, ItemStatus::Queued);
        f.manager.remove_by_token(added.token);

        assert!(matches!(
            rx.try_recv().unwrap(),
            AutoSearchEvent::ItemAdded(_)
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            AutoSearchEvent::ItemUpdated(_)
        ));
        match rx.try_recv().unwrap() {
            AutoSearchEvent::ItemRemoved(s) => assert_eq!(s, "event test"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn round_robin_selects_each_item_once_per_cycle() {
        let f = fixture();
        f.manager.add(item("item aaaaa")).unwrap();
        f.manager.add(item("item bbbbb")).unwrap();
        f.manager.add(item("item ccccc")).unwrap();

        // interval is 1 minute, so every tick is eligible
        f.manager.on_minute_tick_at(noon(1));
        f.manager.on_minute_tick_at(noon(2));
        f.manager.on_minute_tick_at(noon(3));

        let queries: Vec<String> = f
            .search
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.query.clone())
            .collect();
        assert_eq!(queries, ["item aaaaa", "item bbbbb", "item ccccc"]);

        // next tick reaches end of list: no search, recheck starts
        f.manager.on_minute_tick_at(noon(4));
        assert_eq!(f.search.requests.lock().unwrap().len(), 3);

        // recheck is 3 minutes; two silent ticks then a new cycle
        f.manager.on_minute_tick_at(noon(5));
        f.manager.on_minute_tick_at(noon(6));
        f.manager.on_minute_tick_at(noon(7));
        let queries: Vec<String> = f
            .search
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.query.clone())
            .collect();
        assert_eq!(
            queries.last().map(String::as_str),
            Some("item aaaaa"),
            "new cycle restarts from the first item"
        );
    }

    #[test]
    fn scheduler_skips_disabled_items() {
        let f = fixture();
        let mut disabled = item("item aaaaa");
        disabled.enabled = false;
        f.manager.add(disabled).unwrap();
        f.manager.add(item("item bbbbb")).unwrap();

        f.manager.on_minute_tick_at(noon(1));
        let requests = f.search.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].query, "item bbbbb");
    }

    #[test]
    fn scheduler_requires_online_hubs() {
        let clients = FakeClients {
            hubs: Vec::new(),
            ..FakeClients::default()
        };
        let f = fixture_with(clients, FakeShare::default(), FakeQueue::default());
        f.manager.add(item("item aaaaa")).unwrap();
        f.manager.on_minute_tick_at(noon(1));
        assert!(f.search.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn scheduler_honors_search_interval() {
        // interval 5 starts with a 2-minute head start: the first
        // search goes out on the second tick, the next one 5 ticks
        // after that
        let search = Arc::new(FakeSearch::default());
        let services = Services {
            search: search.clone(),
            clients: Arc::new(FakeClients::default()),
            share: Arc::new(FakeShare::default()),
            queue: Arc::new(FakeQueue::default()),
            listings: Arc::new(FakeListings::default()),
            targets: Arc::new(FakeTargets),
            search_types: Arc::new(FakeTypes),
        };
        let config = AutoSearchConfig::new().with_search_interval_mins(5);
        let manager = AutoSearchManager::new(services, config);
        manager.add(item("item aaaaa")).unwrap();
        manager.add(item("item bbbbb")).unwrap();

        let counts: Vec<usize> = (1..=8)
            .map(|day| {
                manager.on_minute_tick_at(noon(day));
                search.requests.lock().unwrap().len()
            })
            .collect();
        assert_eq!(counts, [0, 1, 1, 1, 1, 1, 2, 2]);
    }

    #[test]
    fn expired_items_are_removed_before_selection() {
        let f = fixture();
        let mut expiring = item("item aaaaa");
        expiring.expire_time = 1; // long past
        f.manager.add(expiring).unwrap();
        f.manager.add(item("item bbbbb")).unwrap();

        f.manager.on_minute_tick_at(noon(1));

        assert_eq!(f.manager.len(), 1);
        let requests = f.search.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].query, "item bbbbb");
    }

    #[test]
    fn removing_before_cursor_does_not_skip_items() {
        let f = fixture();
        let a = f.manager.add(item("item aaaaa")).unwrap();
        f.manager.add(item("item bbbbb")).unwrap();
        f.manager.add(item("item ccccc")).unwrap();

        f.manager.on_minute_tick_at(noon(1)); // selects a, cursor = 1
        assert_eq!(f.manager.cursor(), 1);

        f.manager.remove_by_token(a.token);
        assert_eq!(f.manager.cursor(), 0);

        f.manager.on_minute_tick_at(noon(2)); // must select b, not c
        let requests = f.search.requests.lock().unwrap();
        assert_eq!(requests.last().unwrap().query, "item bbbbb");
    }

    #[test]
    fn unknown_file_type_falls_back_to_generic() {
        let f = fixture();
        let mut odd = item("item aaaaa");
        odd.file_type = "flac-only".to_string();
        let added = f.manager.add(odd).unwrap();

        f.manager.on_minute_tick_at(noon(1));

        // search went out as generic and the item was rewritten
        assert_eq!(f.search.requests.lock().unwrap()[0].mode, 0);
        let reloaded = f.manager.item_by_token(added.token).unwrap();
        assert_eq!(reloaded.file_type, SEARCH_TYPE_ANY);
    }

    #[test]
    fn manual_search_bypasses_windows_and_marks_pending() {
        let f = fixture();
        let mut narrow = item("item aaaaa");
        narrow.enabled = false;
        let added = f.manager.add(narrow).unwrap();

        assert!(f.manager.manual_search(added.token));
        let requests = f.search.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].category, SearchCategory::Manual);
        drop(requests);

        let reloaded = f.manager.item_by_token(added.token).unwrap();
        assert!(reloaded.manual_search_pending);
    }

    #[test]
    fn result_matching_queues_file() {
        let f = fixture();
        let added = f.manager.add(item("greatest hits")).unwrap();

        f.manager
            .on_search_result(&result("music/Greatest Hits.mp3", ResultKind::File));

        assert_eq!(
            f.queue.files.lock().unwrap().as_slice(),
            ["/dl/Greatest Hits.mp3"]
        );
        let reloaded = f.manager.item_by_token(added.token).unwrap();
        assert_eq!(reloaded.status, ItemStatus::Queued);
    }

    #[test]
    fn bundle_self_search_results_are_ignored() {
        let f = fixture();
        f.manager.add(item("greatest hits")).unwrap();
        let mut r = result("music/Greatest Hits.mp3", ResultKind::File);
        r.token = BUNDLE_SEARCH_TOKEN.to_string();
        f.manager.on_search_result(&r);
        assert!(f.queue.files.lock().unwrap().is_empty());
    }

    #[test]
    fn directory_item_only_matches_directory_results() {
        let f = fixture();
        let mut dir_item = item("greatest hits");
        dir_item.file_type = SEARCH_TYPE_DIRECTORY.to_string();
        let added = f.manager.add(dir_item).unwrap();

        f.manager
            .on_search_result(&result("music/Greatest Hits.mp3", ResultKind::File));
        assert!(f.listings.downloads.lock().unwrap().is_empty());

        f.manager
            .on_search_result(&result("music/Greatest Hits/", ResultKind::Directory));
        let downloads = f.listings.downloads.lock().unwrap();
        assert_eq!(downloads.len(), 1);
        assert_eq!(downloads[0].0, "music/Greatest Hits/");
        drop(downloads);

        let reloaded = f.manager.item_by_token(added.token).unwrap();
        assert_eq!(reloaded.status, ItemStatus::List);
    }

    #[test]
    fn shared_directory_is_deduplicated() {
        let mut share = FakeShare::default();
        share.shared.insert("Greatest Hits".to_string());
        let f = fixture_with(FakeClients::default(), share, FakeQueue::default());

        let mut dir_item = item("greatest hits");
        dir_item.file_type = SEARCH_TYPE_DIRECTORY.to_string();
        dir_item.check_already_shared = true;
        let added = f.manager.add(dir_item).unwrap();

        f.manager
            .on_search_result(&result("music/Greatest Hits/", ResultKind::Directory));

        assert!(f.listings.downloads.lock().unwrap().is_empty());
        let reloaded = f.manager.item_by_token(added.token).unwrap();
        assert_eq!(reloaded.status, ItemStatus::Searching, "status unchanged");
    }

    #[test]
    fn queued_directory_is_deduplicated() {
        let mut queue = FakeQueue::default();
        queue.queued_dirs.insert("Greatest Hits".to_string());
        let f = fixture_with(FakeClients::default(), FakeShare::default(), queue);

        let mut dir_item = item("greatest hits");
        dir_item.file_type = SEARCH_TYPE_DIRECTORY.to_string();
        dir_item.check_already_queued = true;
        f.manager.add(dir_item).unwrap();

        f.manager
            .on_search_result(&result("music/Greatest Hits/", ResultKind::Directory));
        assert!(f.listings.downloads.lock().unwrap().is_empty());
    }

    #[test]
    fn queue_action_pauses_downloads() {
        let f = fixture();
        let mut it = item("greatest hits");
        it.action = ActionKind::Queue;
        it.file_type = SEARCH_TYPE_DIRECTORY.to_string();
        f.manager.add(it).unwrap();

        f.manager
            .on_search_result(&result("music/Greatest Hits/", ResultKind::Directory));
        let downloads = f.listings.downloads.lock().unwrap();
        assert_eq!(downloads[0].1, QueuePriority::Paused);
    }

    #[test]
    fn queue_failure_is_swallowed() {
        let queue = FakeQueue {
            fail_add: true,
            ..FakeQueue::default()
        };
        let f = fixture_with(FakeClients::default(), FakeShare::default(), queue);
        let added = f.manager.add(item("greatest hits")).unwrap();

        f.manager
            .on_search_result(&result("music/Greatest Hits.mp3", ResultKind::File));

        // failure leaves the status untouched and does not panic
        let reloaded = f.manager.item_by_token(added.token).unwrap();
        assert_eq!(reloaded.status, ItemStatus::Searching);
    }

    #[test]
    fn tth_item_matches_on_hash() {
        let f = fixture();
        let mut it = item("unused pattern");
        it.file_type = SEARCH_TYPE_TTH.to_string();
        it = it.with_matcher(crate::search::matcher::MatchMethod::Exact, &"A".repeat(39));
        f.manager.add(it).unwrap();

        f.manager
            .on_search_result(&result("whatever/name.bin", ResultKind::File));
        assert_eq!(f.queue.files.lock().unwrap().len(), 1);

        let mut other = result("whatever/name.bin", ResultKind::File);
        other.tth = "B".repeat(39);
        f.manager.on_search_result(&other);
        assert_eq!(f.queue.files.lock().unwrap().len(), 1);
    }

    #[test]
    fn nick_filter_consults_known_nicks() {
        let clients = FakeClients {
            nicks: vec!["bob".to_string()],
            ..FakeClients::default()
        };
        let f = fixture_with(clients, FakeShare::default(), FakeQueue::default());
        let it = item("greatest hits").with_user_matcher("alice*");
        f.manager.add(it).unwrap();

        f.manager
            .on_search_result(&result("music/Greatest Hits.mp3", ResultKind::File));
        assert!(f.queue.files.lock().unwrap().is_empty());
    }

    #[test]
    fn report_action_sends_hub_message_and_removes() {
        let clients = FakeClients {
            online_user: Some(OnlineUser {
                nick: "alice".to_string(),
                connected: true,
            }),
            ..FakeClients::default()
        };
        let f = fixture_with(clients, FakeShare::default(), FakeQueue::default());
        let mut it = item("greatest hits");
        it.action = ActionKind::Report;
        it.remove_after_completion = true;
        f.manager.add(it).unwrap();

        f.manager
            .on_search_result(&result("music/Greatest Hits.mp3", ResultKind::File));

        let messages = f.clients.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("music/Greatest Hits.mp3"));
        assert!(messages[0].1.contains("alice"));
        drop(messages);
        assert!(f.manager.is_empty());
    }

    #[test]
    fn report_without_online_user_keeps_item() {
        let f = fixture();
        let mut it = item("greatest hits");
        it.action = ActionKind::Report;
        it.remove_after_completion = true;
        f.manager.add(it).unwrap();

        f.manager
            .on_search_result(&result("music/Greatest Hits.mp3", ResultKind::File));
        assert_eq!(f.manager.len(), 1);
    }

    #[test]
    fn rejected_item_accepts_result_after_manual_search() {
        let f = fixture();
        let mut it = item("greatest hits");
        it.status = ItemStatus::Queued;
        it.remove_after_completion = true;
        let added = f.manager.add(it).unwrap();

        // rejected: allow_new_items is false
        f.manager
            .on_search_result(&result("music/Greatest Hits.mp3", ResultKind::File));
        assert!(f.queue.files.lock().unwrap().is_empty());

        f.manager.manual_search(added.token);
        f.manager
            .on_search_result(&result("music/Greatest Hits.mp3", ResultKind::File));
        assert_eq!(f.queue.files.lock().unwrap().len(), 1);

        // the pending flag was consumed
        f.manager
            .on_search_result(&result("music/Other Hits.mp3", ResultKind::File));
        assert_eq!(f.queue.files.lock().unwrap().len(), 1);
    }

    #[test]
    fn bundle_lifecycle() {
        let f = fixture();
        let mut it = item("greatest hits");
        it.remove_after_completion = true;
        let added = f.manager.add(it).unwrap();

        f.manager.on_bundle_added(added.token, "bundle-1");
        let reloaded = f.manager.item_by_token(added.token).unwrap();
        assert_eq!(reloaded.status, ItemStatus::Queued);
        assert!(reloaded.bundle_tokens.contains("bundle-1"));

        assert_eq!(
            f.manager.bundle_info(added.token),
            vec![("bundle-1".to_string(), "bundle bundle-1".to_string())]
        );

        f.manager.on_bundle_scan_failed(added.token, true);
        assert_eq!(
            f.manager.item_by_token(added.token).unwrap().status,
            ItemStatus::FailedExtras
        );

        // unfinished removal keeps the item
        f.manager.on_bundle_removed(added.token, "bundle-1", false);
        assert_eq!(f.manager.len(), 1);

        f.manager.on_bundle_added(added.token, "bundle-2");
        f.manager.on_bundle_removed(added.token, "bundle-2", true);
        assert!(f.manager.is_empty());
    }

    #[test]
    fn search_type_rename_rewrites_items() {
        let f = fixture();
        let mut it = item("greatest hits");
        it.file_type = "custom".to_string();
        let added = f.manager.add(it).unwrap();

        f.manager.on_search_type_renamed("custom", "music");
        assert_eq!(
            f.manager.item_by_token(added.token).unwrap().file_type,
            "music"
        );
    }

    #[tokio::test]
    async fn ticker_spawns_and_shuts_down() {
        let f = fixture();
        let handle = f.manager.spawn_ticker();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown().await;
    }
}
