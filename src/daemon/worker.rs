//! The menu worker
//!
//! Runs on its own thread and owns the open database. It sleeps until woken,
//! runs one menu session, clears the wake flag and goes back to sleep. A wake
//! that arrives while a session is showing is absorbed by that clear.

use crate::config::{Config, DatabaseConfig};
use crate::daemon::signal::{Flag, Signals};
use crate::daemon::timer::CacheTimer;
use crate::external::Pinentry;
use crate::menu::{show_error, MenuTools, Navigator, Outcome};
use crate::vault::{CompositeKey, DatabaseSession, VaultError, VaultStore};
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Asks the daemon to stop; failures are swallowed
pub type KillSwitch = Box<dyn Fn() + Send>;

/// Owner of the database session and the menu loop
pub struct MenuWorker {
    config: Arc<Config>,
    signals: Arc<Signals>,
    store: Arc<dyn VaultStore>,
    tools: MenuTools,
    timer: CacheTimer,
    kill_switch: KillSwitch,
    session: Option<DatabaseSession>,
}

impl MenuWorker {
    pub fn new(
        config: Arc<Config>,
        signals: Arc<Signals>,
        store: Arc<dyn VaultStore>,
        tools: MenuTools,
        timer: CacheTimer,
        kill_switch: KillSwitch,
    ) -> Self {
        Self {
            config,
            signals,
            store,
            tools,
            timer,
            kill_switch,
            session: None,
        }
    }

    /// Run the worker loop on a new thread
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("menu-worker".to_string())
            .spawn(move || self.run())
    }

    /// Serve wakes until the kill flag is set
    pub fn run(mut self) {
        info!("Menu worker started");
        loop {
            match self.signals.wait_any(&[Flag::Kill, Flag::Wake]) {
                Flag::Kill => break,
                _ => self.run_once(),
            }
        }
        self.timer.cancel();
        info!("Menu worker stopped");
    }

    /// Handle one wake: refresh the database if needed, then show the menu
    pub fn run_once(&mut self) {
        self.activate();
        self.signals.clear(Flag::Wake);
        debug!("Menu worker idle");
    }

    /// The open session, if any
    pub fn session(&self) -> Option<&DatabaseSession> {
        self.session.as_ref()
    }

    fn activate(&mut self) {
        let expired = self.signals.take(Flag::CacheExpired);
        if self.session.is_none() {
            if !self.open() {
                return;
            }
        } else if expired {
            info!("Cache expired, reloading database");
            if !self.reload() {
                return;
            }
        }

        loop {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            match Navigator::new(session, &self.tools).run() {
                Outcome::Done => return,
                Outcome::Reload => {
                    info!("Reload requested");
                    if !self.reload() {
                        return;
                    }
                }
                Outcome::Kill => {
                    info!("Kill requested from menu");
                    (self.kill_switch)();
                    return;
                }
            }
        }
    }

    /// Replace the session with a fresh read of the same file
    fn reload(&mut self) -> bool {
        let Some(current) = self.session.as_ref() else {
            return self.open();
        };
        match current.reopen() {
            Ok(fresh) => {
                self.session = Some(fresh);
                self.timer.restart();
                true
            }
            Err(VaultError::Auth) => {
                // The key changed underneath us; ask again
                warn!("Stored key no longer opens {:?}", current.path());
                self.session = None;
                self.open()
            }
            Err(e) => {
                show_error(&*self.tools.selector, &format!("Failed to reload database: {}", e));
                // Try again on the next wake
                self.signals.set(Flag::CacheExpired);
                false
            }
        }
    }

    /// Open a database for the first time, prompting as needed
    fn open(&mut self) -> bool {
        let Some(database) = self.choose_database() else {
            return false;
        };
        let Some(passphrase) = self.passphrase(&database) else {
            debug!("Passphrase prompt cancelled");
            return false;
        };

        let opened = CompositeKey::new(passphrase.as_str(), database.keyfile.as_deref()).and_then(
            |key| {
                DatabaseSession::open(
                    Arc::clone(&self.store),
                    &database.path,
                    database.keyfile.as_deref(),
                    key,
                )
            },
        );
        match opened {
            Ok(session) => {
                self.session = Some(session);
                self.timer.restart();
                true
            }
            Err(e) => {
                show_error(&*self.tools.selector, &format!("Failed to open database: {}", e));
                false
            }
        }
    }

    fn choose_database(&self) -> Option<DatabaseConfig> {
        let databases = &self.config.databases;
        match databases.len() {
            0 => {
                show_error(&*self.tools.selector, "No database configured");
                None
            }
            1 => Some(databases[0].clone()),
            _ => {
                let options: Vec<String> = databases
                    .iter()
                    .map(|d| d.path.display().to_string())
                    .collect();
                let answer = match self.tools.selector.select("Select database", &options, false) {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!("Selector failed: {}", e);
                        return None;
                    }
                };
                let index = options.iter().position(|o| *o == answer)?;
                Some(databases[index].clone())
            }
        }
    }

    /// Inline passphrase, else pinentry, else an obscured selector prompt
    fn passphrase(&self, database: &DatabaseConfig) -> Option<Zeroizing<String>> {
        if let Some(ref password) = database.password {
            return Some(Zeroizing::new(password.clone()));
        }

        let description = format!("Enter passphrase for {}", database.path.display());
        if let Some(ref program) = self.config.external.pinentry {
            return match Pinentry::new(program.clone()).get_pin(&description, "Passphrase") {
                Ok(pin) => pin.filter(|p| !p.is_empty()),
                Err(e) => {
                    show_error(&*self.tools.selector, &format!("pinentry failed: {}", e));
                    None
                }
            };
        }

        match self.tools.selector.select("Passphrase", &[], true) {
            Ok(answer) if !answer.is_empty() => Some(Zeroizing::new(answer)),
            Ok(_) => None,
            Err(e) => {
                warn!("Selector failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{FixedEditor, RecordingTypist};
    use crate::menu::frame::{KILL, RELOAD};
    use crate::menu::selector::{Selector, SelectorResult};
    use crate::menu::{AutotypeSequence, ScriptedSelector};
    use crate::vault::{Database, Field, MemoryStore};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::runtime::Runtime;

    struct Harness {
        runtime: Runtime,
        signals: Arc<Signals>,
        store: MemoryStore,
        selector: ScriptedSelector,
        killed: Arc<AtomicBool>,
    }

    impl Harness {
        fn new() -> Self {
            let mut db = Database::new("Root");
            let id = db.add_entry(db.root()).unwrap();
            db.set_field(id, Field::Title, "mail".to_string()).unwrap();
            Self {
                runtime: Runtime::new().unwrap(),
                signals: Arc::new(Signals::new()),
                store: MemoryStore::with_database("/db", "pw", db),
                selector: ScriptedSelector::default(),
                killed: Arc::new(AtomicBool::new(false)),
            }
        }

        fn config(password: Option<&str>) -> Config {
            let mut config = Config::default();
            config.databases.push(DatabaseConfig {
                path: "/db".into(),
                keyfile: None,
                password: password.map(String::from),
            });
            config
        }

        fn worker(&self, config: Config, period: Duration) -> MenuWorker {
            self.worker_with_selector(config, period, Arc::new(self.selector.clone()))
        }

        fn worker_with_selector(
            &self,
            config: Config,
            period: Duration,
            selector: Arc<dyn Selector>,
        ) -> MenuWorker {
            let tools = MenuTools {
                selector,
                typist: Arc::new(RecordingTypist::new()),
                editor: Arc::new(FixedEditor::default()),
                autotype: AutotypeSequence::parse("{TITLE}"),
            };
            let timer = CacheTimer::new(
                self.runtime.handle().clone(),
                period,
                Arc::clone(&self.signals),
            );
            let killed = Arc::clone(&self.killed);
            MenuWorker::new(
                Arc::new(config),
                Arc::clone(&self.signals),
                Arc::new(self.store.clone()),
                tools,
                timer,
                Box::new(move || killed.store(true, Ordering::SeqCst)),
            )
        }
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_first_wake_opens_with_inline_password() {
        let h = Harness::new();
        let mut worker = h.worker(Harness::config(Some("pw")), HOUR);
        h.signals.set(Flag::Wake);

        worker.run_once();
        assert!(worker.session().is_some());
        assert_eq!(h.store.open_count(), 1);
        assert!(!h.signals.is_set(Flag::Wake));
        // No passphrase prompt, only the top menu
        assert_eq!(h.selector.prompts(), vec!["keymenu"]);
    }

    #[test]
    fn test_passphrase_prompt_is_obscured() {
        let h = Harness::new();
        h.selector.push(["pw"]);
        let mut worker = h.worker(Harness::config(None), HOUR);

        worker.run_once();
        let shown = h.selector.shown();
        assert_eq!(shown[0].prompt, "Passphrase");
        assert!(shown[0].obscure);
        assert!(worker.session().is_some());
    }

    #[test]
    fn test_wrong_passphrase_shows_error_and_idles() {
        let h = Harness::new();
        h.selector.push(["wrong"]);
        let mut worker = h.worker(Harness::config(None), HOUR);
        h.signals.set(Flag::Wake);

        worker.run_once();
        assert!(worker.session().is_none());
        assert_eq!(h.selector.prompts(), vec!["Passphrase", "Error"]);
        assert!(!h.signals.is_set(Flag::Wake));
    }

    #[test]
    fn test_choose_among_databases() {
        let h = Harness::new();
        h.store.insert("/other", "pw2", Database::new("Other"));
        let mut config = Harness::config(Some("pw"));
        config.databases.push(DatabaseConfig {
            path: "/other".into(),
            keyfile: None,
            password: Some("pw2".to_string()),
        });
        h.selector.push(["/other"]);
        let mut worker = h.worker(config, HOUR);

        worker.run_once();
        assert_eq!(worker.session().unwrap().path(), Path::new("/other"));
    }

    #[test]
    fn test_empty_top_selection_leaves_database_alone() {
        let h = Harness::new();
        let mut worker = h.worker(Harness::config(Some("pw")), HOUR);
        worker.run_once();
        worker.run_once();
        assert_eq!(h.store.save_count(), 0);
        assert_eq!(h.store.open_count(), 1);
    }

    #[test]
    fn test_cache_expired_forces_exactly_one_reload() {
        let h = Harness::new();
        let mut worker = h.worker(Harness::config(Some("pw")), HOUR);
        worker.run_once();
        assert_eq!(h.store.open_count(), 1);

        h.signals.set(Flag::CacheExpired);
        h.signals.set(Flag::Wake);
        worker.run_once();
        assert_eq!(h.store.open_count(), 2);
        assert!(!h.signals.is_set(Flag::CacheExpired));

        worker.run_once();
        assert_eq!(h.store.open_count(), 2);
    }

    #[test]
    fn test_elapsed_cache_period_reloads_on_next_wake() {
        let h = Harness::new();
        let mut worker = h.worker(Harness::config(Some("pw")), Duration::from_millis(50));
        worker.run_once();
        assert_eq!(h.store.open_count(), 1);

        std::thread::sleep(Duration::from_millis(400));
        assert!(h.signals.is_set(Flag::CacheExpired));
        worker.run_once();
        assert_eq!(h.store.open_count(), 2);
    }

    #[test]
    fn test_reload_picks_up_external_changes() {
        let h = Harness::new();
        h.selector.push([RELOAD]);
        let mut worker = h.worker(Harness::config(Some("pw")), HOUR);

        h.store.insert("/db", "pw", Database::new("Root"));
        worker.run_once();
        assert_eq!(h.store.open_count(), 2);
        assert!(worker.session().unwrap().db().entries().is_empty());
        // Restarted at the top after the reload
        assert_eq!(h.selector.prompts(), vec!["keymenu", "keymenu"]);
    }

    #[test]
    fn test_kill_from_menu() {
        let h = Harness::new();
        h.selector.push([KILL]);
        let mut worker = h.worker(Harness::config(Some("pw")), HOUR);
        worker.run_once();
        assert!(h.killed.load(Ordering::SeqCst));
    }

    /// Sets Wake while a prompt is up and records whether it was still set
    struct WakeDuringSession {
        signals: Arc<Signals>,
        seen_set: Arc<AtomicBool>,
    }

    impl Selector for WakeDuringSession {
        fn select(&self, _prompt: &str, _options: &[String], _obscure: bool) -> SelectorResult<String> {
            self.signals.set(Flag::Wake);
            self.seen_set
                .store(self.signals.is_set(Flag::Wake), Ordering::SeqCst);
            Ok(String::new())
        }
    }

    #[test]
    fn test_wake_during_session_is_absorbed() {
        let h = Harness::new();
        let seen_set = Arc::new(AtomicBool::new(false));
        let selector = WakeDuringSession {
            signals: Arc::clone(&h.signals),
            seen_set: Arc::clone(&seen_set),
        };
        let mut worker =
            h.worker_with_selector(Harness::config(Some("pw")), HOUR, Arc::new(selector));

        h.signals.set(Flag::Wake);
        worker.run_once();
        assert!(seen_set.load(Ordering::SeqCst));
        assert!(!h.signals.is_set(Flag::Wake));
    }

    #[test]
    fn test_run_exits_on_kill() {
        let h = Harness::new();
        let worker = h.worker(Harness::config(Some("pw")), HOUR);
        let handle = worker.spawn().unwrap();
        h.signals.set(Flag::Kill);
        handle.join().unwrap();
    }
}
