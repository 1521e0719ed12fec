//! Database access: pooled sessions, transactions and savepoints.
//!
//! An [`Adapter`] owns a small pool of driver sessions. Statements outside a
//! transaction borrow any idle session. Inside [`Adapter::transaction`] the
//! transaction's session is reachable from anywhere in the same task, so
//! nested queries, hooks and relation writes join it without passing a handle
//! around. Statements issued concurrently within one transaction queue on the
//! session and run one at a time, in the order they were issued.

#[cfg(feature = "tokio-postgres")]
pub mod tokio_postgres;

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use relq_core::{Error, QueryError, Result, Statement, quote_ident, relq_trace_query, relq_trace_tx};
use relq_postgres::{PostgresValue, TransactionOptions};
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};

use crate::{
    config::{AdapterConfig, ConfigOverrides},
    row::{QueryResult, RowSet},
};

/// One open database connection.
pub trait Session: Send {
    /// Runs one statement with `$n` placeholders bound to `values`.
    fn query<'a>(&'a mut self, text: &'a str, values: &'a [PostgresValue]) -> BoxFuture<'a, Result<RowSet>>;

    /// Runs statements without parameters: transaction control, settings.
    fn batch<'a>(&'a mut self, text: &'a str) -> BoxFuture<'a, Result<()>>;

    /// False once the connection is unusable; the pool then drops it.
    fn is_open(&self) -> bool {
        true
    }
}

/// Opens sessions for an [`Adapter`].
pub trait Driver: Send + Sync {
    fn connect<'a>(&'a self, config: &'a AdapterConfig) -> BoxFuture<'a, Result<Box<dyn Session>>>;
}

/// Deferred work run after the enclosing transaction commits.
pub type CommitHook = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

struct Pool {
    driver: Arc<dyn Driver>,
    config: AdapterConfig,
    idle: Mutex<Vec<Box<dyn Session>>>,
    permits: Arc<Semaphore>,
}

/// A session checked out of the pool; returned to it on drop.
struct Pooled {
    session: Option<Box<dyn Session>>,
    pool: Arc<Pool>,
    _permit: OwnedSemaphorePermit,
}

impl Pooled {
    fn session(&mut self) -> Result<&mut (dyn Session + 'static)> {
        self.session
            .as_deref_mut()
            .ok_or_else(|| Error::Transaction("session was discarded".to_owned()))
    }

    fn discard(&mut self) {
        self.session = None;
    }
}

impl Drop for Pooled {
    fn drop(&mut self) {
        if let Some(session) = self.session.take()
            && session.is_open()
            && !self.pool.permits.is_closed()
        {
            self.pool.idle.lock().push(session);
        }
    }
}

struct TxState {
    pool: usize,
    session: AsyncMutex<Pooled>,
    savepoints: AtomicU32,
}

impl TxState {
    async fn batch(&self, text: &str) -> Result<()> {
        let mut session = self.session.lock().await;
        session.session()?.batch(text).await
    }
}

/// One level of a transaction: the top-level body or a savepoint body.
///
/// Savepoints opened from the same frame take turns on `children`, so a
/// sibling's rollback never undoes another sibling's statements. Commit
/// hooks queued in a frame move to its parent when the savepoint is
/// released and are dropped when it rolls back.
struct Frame {
    tx: Arc<TxState>,
    children: AsyncMutex<()>,
    on_commit: Mutex<Vec<CommitHook>>,
}

impl Frame {
    fn new(tx: Arc<TxState>) -> Arc<Self> {
        Arc::new(Self {
            tx,
            children: AsyncMutex::new(()),
            on_commit: Mutex::new(Vec::new()),
        })
    }

    fn take_hooks(&self) -> Vec<CommitHook> {
        std::mem::take(&mut *self.on_commit.lock())
    }
}

tokio::task_local! {
    static CURRENT_TX: Arc<Frame>;
}

/// Pooled access to one database.
#[derive(Clone)]
pub struct Adapter {
    pool: Arc<Pool>,
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("host", &self.pool.config.host)
            .field("database", &self.pool.config.database)
            .field("idle", &self.pool.idle.lock().len())
            .finish()
    }
}

impl Adapter {
    pub fn new(driver: impl Driver + 'static, config: AdapterConfig) -> Self {
        Self::with_driver(Arc::new(driver), config)
    }

    fn with_driver(driver: Arc<dyn Driver>, config: AdapterConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections.max(1)));
        Self {
            pool: Arc::new(Pool {
                driver,
                config,
                idle: Mutex::new(Vec::new()),
                permits,
            }),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.pool.config
    }

    pub fn database(&self) -> &str {
        &self.pool.config.database
    }

    pub fn user(&self) -> &str {
        &self.pool.config.user
    }

    pub fn host(&self) -> &str {
        &self.pool.config.host
    }

    pub fn search_path(&self) -> Option<&str> {
        self.pool.config.search_path.as_deref()
    }

    /// A new adapter over the same driver with some settings replaced. The two
    /// share no sessions and no transactions.
    pub fn reconfigure(&self, overrides: ConfigOverrides) -> Adapter {
        Adapter::with_driver(self.pool.driver.clone(), self.pool.config.merged(overrides))
    }

    /// Closes the pool: idle sessions are dropped and new statements fail.
    /// Sessions in use are dropped when released.
    pub fn close(&self) {
        self.pool.permits.close();
        self.pool.idle.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.pool.permits.is_closed()
    }

    fn pool_id(&self) -> usize {
        Arc::as_ptr(&self.pool) as *const () as usize
    }

    fn current(&self) -> Option<Arc<Frame>> {
        CURRENT_TX
            .try_with(Arc::clone)
            .ok()
            .filter(|frame| frame.tx.pool == self.pool_id())
    }

    /// True inside a transaction body of this adapter.
    pub fn in_transaction(&self) -> bool {
        self.current().is_some()
    }

    async fn connect(&self) -> Result<Box<dyn Session>> {
        let pool = &self.pool;
        let mut session = pool.config.connect_retry.run(|| pool.driver.connect(&pool.config)).await?;
        if let Some(path) = &pool.config.search_path {
            let schemas: Vec<String> = path.split(',').map(|schema| quote_ident(schema.trim())).collect();
            session.batch(&format!("SET search_path TO {}", schemas.join(", "))).await?;
        }
        Ok(session)
    }

    async fn acquire(&self) -> Result<Pooled> {
        let permit = self
            .pool
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| QueryError::new("adapter is closed").with_code("08003"))?;
        let idle = self.pool.idle.lock().pop();
        let session = match idle {
            Some(session) => session,
            None => self.connect().await?,
        };
        Ok(Pooled {
            session: Some(session),
            pool: self.pool.clone(),
            _permit: permit,
        })
    }

    async fn run(&self, text: &str, values: &[PostgresValue]) -> Result<RowSet> {
        relq_trace_query!(text, values.len());
        match self.current() {
            Some(frame) => {
                let mut session = frame.tx.session.lock().await;
                session.session()?.query(text, values).await
            }
            None => {
                let mut session = self.acquire().await?;
                session.session()?.query(text, values).await
            }
        }
    }

    /// Runs a statement; rows come back keyed by column name.
    pub async fn query(&self, text: &str, values: &[PostgresValue]) -> Result<QueryResult> {
        self.run(text, values).await.map(QueryResult::from)
    }

    /// Runs a statement; rows come back as value tuples.
    pub async fn arrays(&self, text: &str, values: &[PostgresValue]) -> Result<RowSet> {
        self.run(text, values).await
    }

    /// Runs a compiled statement.
    pub async fn execute(&self, statement: &Statement<PostgresValue>) -> Result<RowSet> {
        self.run(&statement.text, &statement.values).await
    }

    /// Runs `body` in a transaction.
    ///
    /// `BEGIN` first; `COMMIT` when the body succeeds, `ROLLBACK` and the
    /// body's error when it fails. Called inside another transaction of this
    /// adapter, the body runs under a savepoint instead, so its failure only
    /// undoes its own statements. `options` apply to top-level transactions
    /// only.
    pub async fn transaction<F, Fut, T>(&self, options: TransactionOptions, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(frame) = self.current() {
            return savepoint(frame, body).await;
        }

        let mut session = self.acquire().await?;
        let begin = options.begin_statement();
        relq_trace_tx!("begin", begin);
        session.session()?.batch(&begin).await?;

        let tx = Arc::new(TxState {
            pool: self.pool_id(),
            session: AsyncMutex::new(session),
            savepoints: AtomicU32::new(0),
        });
        let frame = Frame::new(tx.clone());
        let result = CURRENT_TX.scope(frame.clone(), async move { body().await }).await;

        let hooks = {
            let mut session = tx.session.lock().await;
            match result {
                Ok(value) => {
                    relq_trace_tx!("commit", self.pool.config.database);
                    session.session()?.batch("COMMIT").await?;
                    (value, frame.take_hooks())
                }
                Err(err) => {
                    relq_trace_tx!("rollback", err);
                    let rolled_back = match session.session() {
                        Ok(session) => session.batch("ROLLBACK").await.is_ok(),
                        Err(_) => false,
                    };
                    if !rolled_back {
                        session.discard();
                    }
                    return Err(err);
                }
            }
        };
        // release the session before commit hooks need one
        drop(frame);
        drop(tx);

        let (value, hooks) = hooks;
        run_commit_hooks(hooks).await?;
        Ok(value)
    }

    /// Runs `hook` after the current transaction commits, or right away
    /// outside a transaction. Hooks queued inside a savepoint that rolls
    /// back are dropped with it.
    pub async fn after_commit<F, Fut>(&self, hook: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        match self.current() {
            Some(frame) => {
                let hook: CommitHook = Box::new(move || -> BoxFuture<'static, Result<()>> { Box::pin(hook()) });
                frame.on_commit.lock().push(hook);
                Ok(())
            }
            None => hook().await,
        }
    }
}

async fn savepoint<F, Fut, T>(parent: Arc<Frame>, body: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let _turn = parent.children.lock().await;
    let tx = parent.tx.clone();
    let name = format!("relq_sp_{}", tx.savepoints.fetch_add(1, Ordering::SeqCst));
    relq_trace_tx!("savepoint", name);
    tx.batch(&format!("SAVEPOINT {name}")).await?;

    let frame = Frame::new(tx.clone());
    let result = CURRENT_TX.scope(frame.clone(), async move { body().await }).await;
    let hooks = frame.take_hooks();

    match result {
        Ok(value) => {
            relq_trace_tx!("release", name);
            tx.batch(&format!("RELEASE SAVEPOINT {name}")).await?;
            parent.on_commit.lock().extend(hooks);
            Ok(value)
        }
        Err(err) => {
            relq_trace_tx!("rollback", name);
            drop(hooks);
            let _ = tx.batch(&format!("ROLLBACK TO SAVEPOINT {name}")).await;
            let _ = tx.batch(&format!("RELEASE SAVEPOINT {name}")).await;
            Err(err)
        }
    }
}

async fn run_commit_hooks(hooks: Vec<CommitHook>) -> Result<()> {
    let mut first_error = None;
    for hook in hooks {
        if let Err(err) = hook().await {
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
