pub mod connection;
pub mod models;
pub mod repository;

use std::time::Duration;

use mongodb::{
    bson::{doc, oid::ObjectId},
    options::ClientOptions,
    Client, Database,
};

use crate::config::DatabaseConfig;
use crate::error::{self, DbError};
use connection::{ConnectionManager, Connector};
use models::Member;
pub use repository::{MemberRepository, MemberStore};

pub type DbManager = ConnectionManager<MongoConnector>;

#[derive(Clone)]
pub struct MongoConnection {
    db: Database,
}

impl MongoConnection {
    pub fn members(&self) -> MemberRepository {
        MemberRepository::new(&self.db)
    }
}

impl MemberStore for MongoConnection {
    async fn find_by_email(&self, email: &str) -> error::Result<Option<Member>> {
        self.members().find_by_email(email).await
    }

    async fn find_by_id(&self, id: &ObjectId) -> error::Result<Option<Member>> {
        self.members().find_by_id(id).await
    }

    async fn update_last_login(&self, id: &ObjectId) -> error::Result<()> {
        self.members().update_last_login(id).await
    }

    async fn insert(&self, member: Member) -> error::Result<ObjectId> {
        self.members().insert(member).await
    }
}

/// Dials MongoDB with bounded connect and socket timeouts.
pub struct MongoConnector {
    uri: String,
    database_name: String,
    connect_timeout: Duration,
    socket_timeout: Duration,
}

impl MongoConnector {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            uri: config.uri.clone(),
            database_name: config.name.clone(),
            connect_timeout: config.connect_timeout(),
            socket_timeout: config.socket_timeout(),
        }
    }
}

impl Connector for MongoConnector {
    type Connection = MongoConnection;

    async fn connect(&self) -> Result<MongoConnection, DbError> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| DbError::Options(e.to_string()))?;
        options.app_name = Some("community-server".to_string());
        options.connect_timeout = Some(self.connect_timeout);
        options.server_selection_timeout = Some(self.connect_timeout);

        let client = Client::with_options(options).map_err(|e| DbError::Options(e.to_string()))?;
        let connection = MongoConnection {
            db: client.database(&self.database_name),
        };

        // The driver connects lazily; a ping forces the handshake.
        self.ping(&connection).await?;

        if let Err(err) = connection.members().init_indexes().await {
            log::warn!("Failed to initialize member indexes: {}", err);
        }

        Ok(connection)
    }

    async fn ping(&self, connection: &MongoConnection) -> Result<(), DbError> {
        let ping = async { connection.db.run_command(doc! { "ping": 1 }).await };
        match tokio::time::timeout(self.socket_timeout, ping).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(DbError::Unreachable(err.to_string())),
            Err(_) => Err(DbError::Timeout(self.socket_timeout)),
        }
    }
}
