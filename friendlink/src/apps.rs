//! Applications known to the native client.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};

use crate::collection::{RefreshGuard, name_matches};
use crate::error::{Result, check};
use crate::native::NativeClient;
use crate::stream::{EventHub, Subscription};
use crate::types::{AppId, AppState};

/// `app_data` value of the `state` key for an app that cannot be launched.
const STATE_UNAVAILABLE: &str = "eStateUnavailable";
const STATE_TOOL: &str = "eStateTool";

/// Observable aspect of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppFacet {
    /// Joining or leaving the application list.
    Membership,
    /// Installation state flags.
    State,
    /// Installed or not.
    Installed,
    /// Launchable or not.
    Playable,
}

/// A change to an application or to the application list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppChange {
    /// The application joined the list.
    Added,
    /// The application left the list.
    Removed,
    /// The state flags changed.
    State(AppState),
    /// The application was installed or uninstalled.
    Installed(bool),
    /// The application became launchable or stopped being so.
    Playable(bool),
}

impl AppChange {
    /// The facet this change belongs to.
    #[must_use]
    pub const fn facet(&self) -> AppFacet {
        match self {
            Self::Added | Self::Removed => AppFacet::Membership,
            Self::State(_) => AppFacet::State,
            Self::Installed(_) => AppFacet::Installed,
            Self::Playable(_) => AppFacet::Playable,
        }
    }
}

/// Notification published by [`App`] and [`Apps`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEvent {
    /// The application concerned.
    pub id: AppId,
    /// What changed.
    pub change: AppChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AppFacets {
    state: AppState,
    installed: bool,
    playable: bool,
}

impl AppFacets {
    fn read(native: &dyn NativeClient, id: AppId, state: AppState) -> Self {
        let installed = native.is_app_installed(id);
        let playable = installed
            && state.contains(AppState::FULLY_INSTALLED)
            && native.app_data(id, "state").as_deref() != Some(STATE_UNAVAILABLE);
        Self {
            state,
            installed,
            playable,
        }
    }

    fn diff(&self, fresh: &Self) -> Vec<AppChange> {
        let mut changes = Vec::new();
        if self.state != fresh.state {
            changes.push(AppChange::State(fresh.state));
        }
        if self.installed != fresh.installed {
            changes.push(AppChange::Installed(fresh.installed));
        }
        if self.playable != fresh.playable {
            changes.push(AppChange::Playable(fresh.playable));
        }
        changes
    }
}

/// Tools, DLC and media files are not games.
fn classify_game(native: &dyn NativeClient, id: AppId) -> bool {
    let is_tool = native.app_data(id, "state").as_deref() == Some(STATE_TOOL);
    let is_dlc = native
        .app_data(id, "DLCForAppID")
        .is_some_and(|v| !v.is_empty());
    let is_media = native.app_data(id, "IsMediaFile").as_deref() == Some("1");
    !(is_tool || is_dlc || is_media)
}

/// One application.
pub struct App {
    id: AppId,
    native: Arc<dyn NativeClient>,
    is_game: bool,
    facets: RwLock<AppFacets>,
    events: EventHub<AppEvent>,
}

impl App {
    fn new(
        id: AppId,
        state: AppState,
        native: Arc<dyn NativeClient>,
        events: EventHub<AppEvent>,
    ) -> Self {
        let is_game = classify_game(native.as_ref(), id);
        let facets = AppFacets::read(native.as_ref(), id, state);
        Self {
            id,
            native,
            is_game,
            facets: RwLock::new(facets),
            events,
        }
    }

    /// Application id.
    #[must_use]
    pub const fn id(&self) -> AppId {
        self.id
    }

    /// Display name, read from the native client.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.native.app_data(self.id, "name")
    }

    /// Icon image name.
    #[must_use]
    pub fn icon(&self) -> Option<String> {
        self.native.app_data(self.id, "icon")
    }

    /// Logo image name.
    #[must_use]
    pub fn logo(&self) -> Option<String> {
        self.native.app_data(self.id, "logo")
    }

    /// Small logo image name.
    #[must_use]
    pub fn small_logo(&self) -> Option<String> {
        self.native.app_data(self.id, "logo_small")
    }

    /// Ask the native client to launch the application.
    ///
    /// # Errors
    ///
    /// [`Error::Native`](crate::Error::Native) if the native client refuses.
    pub fn launch(&self) -> Result<()> {
        check(self.native.launch_app(self.id), "launch app")?;
        tracing::debug!(app = %self.id, "app launched");
        Ok(())
    }

    /// Whether the native client lists it as a game.
    #[must_use]
    pub const fn is_game(&self) -> bool {
        self.is_game
    }

    /// Installation state flags.
    #[must_use]
    pub fn state(&self) -> AppState {
        self.facets.read().state
    }

    /// Whether it is installed.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.facets.read().installed
    }

    /// Whether it is installed, fully downloaded, and not marked unavailable.
    #[must_use]
    pub fn is_playable(&self) -> bool {
        self.facets.read().playable
    }

    /// Subscribe to every change of this application.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<AppEvent> {
        let id = self.id;
        self.events.subscribe_filtered(move |e| e.id == id)
    }

    /// Subscribe to one facet of this application.
    #[must_use]
    pub fn subscribe_facet(&self, facet: AppFacet) -> Subscription<AppEvent> {
        let id = self.id;
        self.events
            .subscribe_filtered(move |e| e.id == id && e.change.facet() == facet)
    }

    /// Apply new state flags, re-deriving the other facets. Publishes only
    /// what changed.
    pub(crate) fn update_state(&self, state: AppState) -> usize {
        let fresh = AppFacets::read(self.native.as_ref(), self.id, state);
        let mut facets = self.facets.write();
        let changes = facets.diff(&fresh);
        *facets = fresh;
        for change in changes.iter().cloned() {
            self.events.publish(&AppEvent {
                id: self.id,
                change,
            });
        }
        changes.len()
    }
}

impl PartialEq for App {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for App {}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let facets = self.facets.read();
        f.debug_struct("App")
            .field("id", &self.id)
            .field("is_game", &self.is_game)
            .field("state", &facets.state)
            .field("installed", &facets.installed)
            .field("playable", &facets.playable)
            .finish_non_exhaustive()
    }
}

/// The observable application list. Same concurrency rules as
/// [`Friends`](crate::Friends).
pub struct Apps {
    native: Arc<dyn NativeClient>,
    list: ArcSwap<Vec<Arc<App>>>,
    writer: Mutex<()>,
    updating: AtomicBool,
    events: EventHub<AppEvent>,
}

impl Apps {
    pub(crate) fn new(native: Arc<dyn NativeClient>) -> Self {
        Self {
            native,
            list: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            updating: AtomicBool::new(false),
            events: EventHub::new(),
        }
    }

    /// Current applications in native enumeration order.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Arc<App>>> {
        self.list.load_full()
    }

    /// Number of applications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.load().len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.load().is_empty()
    }

    /// Look up an application by id.
    #[must_use]
    pub fn get(&self, id: AppId) -> Option<Arc<App>> {
        self.list.load().iter().find(|a| a.id == id).cloned()
    }

    /// Whether `id` is known.
    #[must_use]
    pub fn contains(&self, id: AppId) -> bool {
        self.list.load().iter().any(|a| a.id == id)
    }

    /// First application named `name`.
    #[must_use]
    pub fn by_name(&self, name: &str, case_sensitive: bool) -> Option<Arc<App>> {
        self.list
            .load()
            .iter()
            .find(|a| a.name().is_some_and(|n| name_matches(&n, name, case_sensitive, false)))
            .cloned()
    }

    /// Every application named `name`.
    #[must_use]
    pub fn all_by_name(&self, name: &str, case_sensitive: bool) -> Vec<Arc<App>> {
        self.filter(|a| a.name().is_some_and(|n| name_matches(&n, name, case_sensitive, false)))
    }

    /// Applications whose name contains `search`.
    #[must_use]
    pub fn by_partial_name(&self, search: &str, case_sensitive: bool) -> Vec<Arc<App>> {
        self.filter(|a| a.name().is_some_and(|n| name_matches(&n, search, case_sensitive, true)))
    }

    /// Applications that are games.
    #[must_use]
    pub fn games(&self) -> Vec<Arc<App>> {
        self.filter(App::is_game)
    }

    /// Installed applications.
    #[must_use]
    pub fn installed(&self) -> Vec<Arc<App>> {
        self.filter(App::is_installed)
    }

    fn filter(&self, keep: impl Fn(&App) -> bool) -> Vec<Arc<App>> {
        self.list.load().iter().filter(|a| keep(a)).cloned().collect()
    }

    /// Add `id` with `state`. Returns `false` if it was already known.
    pub fn add(&self, id: AppId, state: AppState) -> bool {
        if self.contains(id) {
            return false;
        }
        let app = Arc::new(self.make(id, state));
        {
            let _writer = self.writer.lock();
            let current = self.list.load_full();
            if current.iter().any(|a| a.id == id) {
                return false;
            }
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(app);
            self.list.store(Arc::new(next));
            self.publish(id, AppChange::Added);
        }
        tracing::debug!(%id, "app added");
        true
    }

    /// Apply a state change reported by the native client. An unknown
    /// application is added on the spot.
    pub(crate) fn apply_state(&self, id: AppId, state: AppState) {
        if let Some(app) = self.get(id) {
            app.update_state(state);
        } else if !self.add(id, state) {
            // Lost a race with a concurrent add.
            if let Some(app) = self.get(id) {
                app.update_state(state);
            }
        }
    }

    /// Resynchronize with the native application enumeration.
    ///
    /// Same contract as [`Friends::refresh`](crate::Friends::refresh).
    pub fn refresh(&self, force: bool) -> bool {
        let Some(_guard) = RefreshGuard::acquire(&self.updating, force) else {
            tracing::debug!("app refresh already running, dropped");
            return false;
        };
        let mut seen = HashSet::new();
        let listed: Vec<(AppId, AppState)> = self
            .native
            .installed_apps()
            .into_iter()
            .filter(|(id, _)| seen.insert(*id))
            .collect();

        let retained = {
            let _writer = self.writer.lock();
            let current = self.list.load_full();
            let known: HashMap<AppId, &Arc<App>> = current.iter().map(|a| (a.id, a)).collect();

            let mut next = Vec::with_capacity(listed.len());
            let mut added = Vec::new();
            let mut retained = Vec::new();
            for (id, state) in &listed {
                if let Some(app) = known.get(id) {
                    retained.push((Arc::clone(app), *state));
                    next.push(Arc::clone(app));
                } else {
                    added.push(*id);
                    next.push(Arc::new(self.make(*id, *state)));
                }
            }
            let removed: Vec<AppId> = current
                .iter()
                .map(|a| a.id)
                .filter(|id| !seen.contains(id))
                .collect();

            self.list.store(Arc::new(next));
            for id in &removed {
                self.publish(*id, AppChange::Removed);
            }
            for id in &added {
                self.publish(*id, AppChange::Added);
            }
            tracing::debug!(
                apps = listed.len(),
                added = added.len(),
                removed = removed.len(),
                "app list refreshed"
            );
            retained
        };

        for (app, state) in retained {
            app.update_state(state);
        }
        true
    }

    /// Subscribe to every change of every application.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<AppEvent> {
        self.events.subscribe()
    }

    /// Subscribe to every change of application `id`.
    #[must_use]
    pub fn subscribe_app(&self, id: AppId) -> Subscription<AppEvent> {
        self.events.subscribe_filtered(move |e| e.id == id)
    }

    /// Subscribe to one facet of application `id`.
    #[must_use]
    pub fn subscribe_facet(&self, id: AppId, facet: AppFacet) -> Subscription<AppEvent> {
        self.events
            .subscribe_filtered(move |e| e.id == id && e.change.facet() == facet)
    }

    fn make(&self, id: AppId, state: AppState) -> App {
        App::new(id, state, Arc::clone(&self.native), self.events.clone())
    }

    fn publish(&self, id: AppId, change: AppChange) {
        self.events.publish(&AppEvent { id, change });
    }
}

impl fmt::Debug for Apps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Apps")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
