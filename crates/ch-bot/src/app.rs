//! Application orchestrator.
//!
//! Owns the sessions, the dispatcher, the REST client, and the
//! persistence driver. Sessions hold only an event sink and a
//! closed-callback pointing back here, so the registry is the single
//! owner of every session's lifetime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ch_client::{
    ClientError, Event, EventSink, Group, Private, RestClient, TokenSource,
};

use crate::BotError;
use crate::config::BotConfig;
use crate::context::Context;
use crate::dispatch::Dispatcher;
use crate::filter::FilterBox;
use crate::handler::{
    CommandArgs, CommandFn, CommandHandler, EventFn, MessageHandler, TypesHandler,
};
use crate::persist::{NoopPersistence, Persistence, SqlitePersistence};

/// The bot application. Cheap to clone.
#[derive(Clone)]
pub struct App {
    core: Arc<AppCore>,
}

pub(crate) struct AppCore {
    config: BotConfig,
    dispatcher: Arc<Dispatcher>,
    rest: Arc<RestClient>,
    persistence: Arc<dyn Persistence>,
    groups: RwLock<HashMap<String, Group>>,
    private: RwLock<Option<Private>>,
    cancel: CancellationToken,
}

impl App {
    /// Build an app with the persistence driver the config names (the
    /// sqlite driver when a path is configured, no-op otherwise).
    pub fn new(config: BotConfig) -> Result<App, BotError> {
        let persistence: Arc<dyn Persistence> = match &config.persistence {
            Some(p) => Arc::new(SqlitePersistence::new(
                std::path::Path::new(&p.sqlite_path),
                p.snapshot_interval,
            )),
            None => Arc::new(NoopPersistence::new()),
        };
        App::with_persistence(config, persistence)
    }

    pub fn with_persistence(
        config: BotConfig,
        persistence: Arc<dyn Persistence>,
    ) -> Result<App, BotError> {
        let rest = Arc::new(RestClient::new(&config.username, &config.password)?);
        let dispatcher = Dispatcher::new(persistence.clone());
        let core = Arc::new(AppCore {
            config,
            dispatcher,
            rest,
            persistence,
            groups: RwLock::new(HashMap::new()),
            private: RwLock::new(None),
            cancel: CancellationToken::new(),
        });
        core.dispatcher.bind_app(&core);
        Ok(App { core })
    }

    pub(crate) fn from_core(core: Arc<AppCore>) -> App {
        App { core }
    }

    pub fn config(&self) -> &BotConfig {
        &self.core.config
    }

    pub fn rest(&self) -> &Arc<RestClient> {
        &self.core.rest
    }

    fn sink(&self) -> Arc<dyn EventSink> {
        self.core.dispatcher.clone()
    }

    // -----------------------------------------------------------------------
    // Handler registration
    // -----------------------------------------------------------------------

    pub fn on_command<F, Fut>(&self, commands: &[&str], f: F)
    where
        F: Fn(Event, Context, CommandArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_command_filtered(commands, None, f);
    }

    pub fn on_command_filtered<F, Fut>(&self, commands: &[&str], filter: Option<FilterBox>, f: F)
    where
        F: Fn(Event, Context, CommandArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: CommandFn = Arc::new(move |event, ctx, args| Box::pin(f(event, ctx, args)));
        self.core.dispatcher.add_handler(Arc::new(CommandHandler::new(
            &self.core.config.prefix,
            commands.iter().copied(),
            filter,
            callback,
        )));
    }

    pub fn on_message<F, Fut>(&self, f: F)
    where
        F: Fn(Event, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_message_filtered(None, f);
    }

    pub fn on_message_filtered<F, Fut>(&self, filter: Option<FilterBox>, f: F)
    where
        F: Fn(Event, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: EventFn = Arc::new(move |event, ctx| Box::pin(f(event, ctx)));
        self.core
            .dispatcher
            .add_handler(Arc::new(MessageHandler::new(filter, callback)));
    }

    /// Register for every event kind in `mask` (see
    /// [`ch_client::event_type`]).
    pub fn on_event<F, Fut>(&self, mask: u64, f: F)
    where
        F: Fn(Event, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: EventFn = Arc::new(move |event, ctx| Box::pin(f(event, ctx)));
        self.core
            .dispatcher
            .add_handler(Arc::new(TypesHandler::new(mask, None, callback)));
    }

    /// Register on the error-handler chain.
    pub fn on_error<F, Fut>(&self, f: F)
    where
        F: Fn(Event, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: EventFn = Arc::new(move |event, ctx| Box::pin(f(event, ctx)));
        self.core.dispatcher.add_error_handler(Arc::new(TypesHandler::new(
            ch_client::event_type::ALL,
            None,
            callback,
        )));
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Load persistence and log the account in (when credentials exist).
    pub async fn initialize(&self) -> Result<(), BotError> {
        self.core.persistence.initialize().await?;
        if !self.core.config.username.is_empty() && !self.core.config.password.is_empty() {
            self.core.rest.login().await?;
            info!(user = %self.core.config.username, "account logged in");
        }
        Ok(())
    }

    /// Join the configured rooms, connect the PM endpoint if enabled, and
    /// start the persistence snapshot loop.
    pub async fn start(&self) -> Result<(), BotError> {
        {
            let persistence = self.core.persistence.clone();
            let cancel = self.core.cancel.child_token();
            tokio::spawn(async move { persistence.periodic_runner(cancel).await });
        }
        for name in self.core.config.groups.clone() {
            if let Err(error) = self.join_group(&name).await {
                warn!(group = %name, %error, "initial join failed");
            }
        }
        if self.core.config.enable_pm {
            if let Err(error) = self.connect_private().await {
                warn!(%error, "pm connect failed");
            }
        }
        info!(groups = self.core.groups.read().unwrap().len(), "bot started");
        Ok(())
    }

    /// Join one room and register it.
    pub async fn join_group(&self, name: &str) -> Result<Group, BotError> {
        let name = name.to_lowercase();
        if self.core.groups.read().unwrap().contains_key(&name) {
            return Err(BotError::Client(ClientError::AlreadyConnected));
        }
        if self.core.config.validate_groups && !self.core.rest.is_group(&name).await? {
            return Err(BotError::Client(ClientError::NotAGroup));
        }
        let weak = Arc::downgrade(&self.core);
        let registry_key = name.clone();
        let on_closed = Box::new(move || {
            if let Some(core) = weak.upgrade() {
                core.groups.write().unwrap().remove(&registry_key);
            }
        });
        let group = Group::join(
            &name,
            self.core.config.session_options(),
            self.sink(),
            Some(on_closed),
        )
        .await?;
        self.core
            .groups
            .write()
            .unwrap()
            .insert(name, group.clone());
        Ok(group)
    }

    /// Leave one room. Returns whether it was joined.
    pub async fn leave_group(&self, name: &str) -> bool {
        let group = self
            .core
            .groups
            .write()
            .unwrap()
            .remove(&name.to_lowercase());
        match group {
            Some(group) => {
                group.leave().await;
                true
            }
            None => false,
        }
    }

    async fn connect_private(&self) -> Result<Private, BotError> {
        let weak = Arc::downgrade(&self.core);
        let on_closed = Box::new(move || {
            if let Some(core) = weak.upgrade() {
                core.private.write().unwrap().take();
            }
        });
        let tokens: Arc<dyn TokenSource> = self.core.rest.clone();
        let private = Private::connect(
            self.core.config.session_options(),
            tokens,
            self.sink(),
            Some(on_closed),
        )
        .await?;
        *self.core.private.write().unwrap() = Some(private.clone());
        Ok(private)
    }

    pub fn group(&self, name: &str) -> Option<Group> {
        self.core
            .groups
            .read()
            .unwrap()
            .get(&name.to_lowercase())
            .cloned()
    }

    pub fn group_names(&self) -> Vec<String> {
        self.core.groups.read().unwrap().keys().cloned().collect()
    }

    pub fn private(&self) -> Option<Private> {
        self.core.private.read().unwrap().clone()
    }

    /// Stop every session, flush persistence, stop background loops.
    pub async fn stop(&self) {
        let groups: Vec<Group> = self.core.groups.write().unwrap().drain().map(|(_, g)| g).collect();
        for group in groups {
            group.leave().await;
        }
        let private = self.core.private.write().unwrap().take();
        if let Some(private) = private {
            private.disconnect().await;
        }
        self.core.cancel.cancel();
        if let Err(error) = self.core.persistence.close().await {
            error!(%error, "persistence close failed");
        }
        info!("bot stopped");
    }

    /// Initialize, start, run until ctrl-c, stop.
    pub async fn run(&self) -> Result<(), BotError> {
        self.initialize().await?;
        self.start().await?;
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
        self.stop().await;
        Ok(())
    }
}
