//! Service wiring: repositories, log pipeline and the operations handlers call.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use clientdesk_auth::{Hs256Jwt, JwtValidator, TokenError, User, normalize_user_name};
use clientdesk_clients::{Client, ClientPatch, NewClient};
use clientdesk_core::{ClientId, DomainError, Page, PageRequest, UserId};
use clientdesk_infra::{
    RepositoryError,
    audit::{
        InMemoryLogStore, LOG_JOB_NAME, LogPersistHandler, LogProducer, LogRecord, LogStore,
        LogStoreError, PostgresLogStore,
    },
    clients::{ClientRepository, InMemoryClientRepository, PostgresClientRepository},
    config::{AppConfig, WorkerSettings},
    db::{self, DbError},
    jobs::{InMemoryJobQueue, Job, JobCounts, JobId, JobQueue, JobState, QueueError, QueueWorker, RedisJobQueue},
    users::{InMemoryUserRepository, PostgresUserRepository, UserRepository},
};

/// Failure of a service operation.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    LogStore(#[from] LogStoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
}

/// Failure while connecting backends at start-up.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("failed to connect to redis: {0}")]
    Queue(#[from] QueueError),
}

/// Storage and queue backends.
#[derive(Clone)]
pub struct Backends {
    pub users: Arc<dyn UserRepository>,
    pub clients: Arc<dyn ClientRepository>,
    pub logs: Arc<dyn LogStore>,
    pub queue: Arc<dyn JobQueue>,
}

impl Backends {
    /// Everything in process memory.
    pub fn in_memory() -> Self {
        Self {
            users: InMemoryUserRepository::arc(),
            clients: InMemoryClientRepository::arc(),
            logs: InMemoryLogStore::arc(),
            queue: InMemoryJobQueue::arc(),
        }
    }

    /// Postgres when `DATABASE_URL` is set, Redis when `REDIS_URL` is set;
    /// in-memory otherwise.
    pub async fn from_config(config: &AppConfig) -> Result<Self, BootstrapError> {
        let mut backends = Self::in_memory();

        if let Some(database) = &config.database {
            let pool = db::connect(database).await?;
            db::migrate(&pool).await?;
            backends.users = Arc::new(PostgresUserRepository::new(pool.clone()));
            backends.clients = Arc::new(PostgresClientRepository::new(pool.clone()));
            backends.logs = Arc::new(PostgresLogStore::new(pool));
        } else {
            info!("DATABASE_URL not set, using in-memory stores");
        }

        if let Some(redis) = &config.redis {
            let queue = RedisJobQueue::connect(&redis.url, redis.connect_timeout).await?;
            backends.queue = Arc::new(queue);
        } else {
            info!("REDIS_URL not set, using in-memory job queue");
        }

        Ok(backends)
    }
}

/// Everything the HTTP layer needs.
pub struct AppServices {
    jwt: Hs256Jwt,
    users: Arc<dyn UserRepository>,
    clients: Arc<dyn ClientRepository>,
    logs: Arc<dyn LogStore>,
    queue: Arc<dyn JobQueue>,
    producer: LogProducer,
}

impl AppServices {
    pub fn new(config: &AppConfig, backends: Backends) -> Self {
        let ttl = chrono::Duration::from_std(config.jwt.ttl).unwrap_or(chrono::Duration::hours(1));
        Self {
            jwt: Hs256Jwt::new(config.jwt.secret.as_bytes(), ttl),
            producer: LogProducer::new(backends.queue.clone(), &config.log_queue),
            users: backends.users,
            clients: backends.clients,
            logs: backends.logs,
            queue: backends.queue,
        }
    }

    pub fn producer(&self) -> &LogProducer {
        &self.producer
    }

    pub fn queue(&self) -> Arc<dyn JobQueue> {
        self.queue.clone()
    }

    /// Worker that drains the log queue into the log store.
    pub fn log_worker(&self, settings: &WorkerSettings) -> QueueWorker {
        let config = settings.worker_config(self.producer.queue_name());
        QueueWorker::new(self.queue.clone(), config)
            .register_handler(LOG_JOB_NAME, Arc::new(LogPersistHandler::new(self.logs.clone())))
    }

    // -------------------------
    // Auth
    // -------------------------

    /// Log in by name, registering unknown names. Returns a signed token.
    pub async fn login(&self, name: &str) -> Result<String, ServiceError> {
        let name = normalize_user_name(name)?;

        let user = match self.users.find_by_name(&name).await? {
            Some(user) => user,
            None => {
                let user = User::new(name.clone(), Utc::now());
                match self.users.insert(&user).await {
                    Ok(()) => {
                        info!(user_id = %user.id, "registered new user");
                        user
                    }
                    // Lost a race with a concurrent login for the same name.
                    Err(RepositoryError::Conflict(_)) => self
                        .users
                        .find_by_name(&name)
                        .await?
                        .ok_or(DomainError::Unauthorized)?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        Ok(self.jwt.issue(user.id, Utc::now())?)
    }

    /// Resolve a bearer token to its (still existing) user.
    pub async fn authenticate(&self, token: &str) -> Result<User, ServiceError> {
        let claims = self.jwt.validate(token, Utc::now())?;
        self.users
            .get(claims.sub)
            .await?
            .ok_or_else(|| DomainError::Unauthorized.into())
    }

    // -------------------------
    // Clients
    // -------------------------

    pub async fn create_client(&self, input: NewClient, created_by: UserId) -> Result<Client, ServiceError> {
        let client = Client::create(input, created_by, Utc::now())?;
        self.clients.insert(&client).await?;
        Ok(client)
    }

    pub async fn get_client(&self, id: ClientId) -> Result<Client, ServiceError> {
        self.clients
            .get(id)
            .await?
            .ok_or_else(|| DomainError::NotFound.into())
    }

    pub async fn list_clients(&self, page: PageRequest) -> Result<Page<Client>, ServiceError> {
        Ok(self.clients.list(page).await?)
    }

    pub async fn update_client(&self, id: ClientId, patch: ClientPatch) -> Result<Client, ServiceError> {
        let mut client = self.get_client(id).await?;
        client.apply(patch, Utc::now())?;
        self.clients.save(&client).await?;
        Ok(client)
    }

    pub async fn delete_client(&self, id: ClientId) -> Result<(), ServiceError> {
        let mut client = self.get_client(id).await?;
        client.soft_delete(Utc::now())?;
        self.clients.save(&client).await?;
        Ok(())
    }

    // -------------------------
    // Logs
    // -------------------------

    pub async fn list_logs(&self, page: PageRequest) -> Result<Page<LogRecord>, ServiceError> {
        Ok(self.logs.list(page).await?)
    }

    // -------------------------
    // Queue dashboard
    // -------------------------

    /// Queues visible on the dashboard.
    pub fn queue_names(&self) -> Vec<String> {
        vec![self.producer.queue_name().to_string()]
    }

    fn known_queue(&self, queue: &str) -> Result<(), ServiceError> {
        if self.queue_names().iter().any(|q| q == queue) {
            Ok(())
        } else {
            Err(ServiceError::UnknownQueue(queue.to_string()))
        }
    }

    pub async fn queue_counts(&self) -> Result<Vec<(String, JobCounts)>, ServiceError> {
        let mut out = Vec::new();
        for name in self.queue_names() {
            let counts = self.queue.counts(&name).await?;
            out.push((name, counts));
        }
        Ok(out)
    }

    pub async fn queue_jobs(&self, queue: &str, state: JobState, limit: usize) -> Result<Vec<Job>, ServiceError> {
        self.known_queue(queue)?;
        Ok(self.queue.list(queue, state, limit).await?)
    }

    pub async fn queue_job(&self, queue: &str, id: JobId) -> Result<Job, ServiceError> {
        self.known_queue(queue)?;
        self.queue
            .get(queue, id)
            .await?
            .ok_or(ServiceError::Queue(QueueError::NotFound(id)))
    }

    pub async fn retry_job(&self, queue: &str, id: JobId) -> Result<Job, ServiceError> {
        self.known_queue(queue)?;
        let job = self.queue.retry_failed(queue, id).await?;
        info!(queue = %queue, job_id = %id, "failed job re-queued by operator");
        Ok(job)
    }
}
