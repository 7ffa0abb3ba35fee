#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use community_server::db::connection::Connector;
use community_server::error::DbError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeConnection {
    pub generation: usize,
}

struct FakeState {
    connects: AtomicUsize,
    pings: AtomicUsize,
    ping_ok: AtomicBool,
    panic_next: AtomicBool,
    reachable_by_default: AtomicBool,
    script: Mutex<VecDeque<bool>>,
    handshake: Duration,
}

/// Scripted stand-in for a database driver.
#[derive(Clone)]
pub struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn reachable(handshake: Duration) -> Self {
        Self::with_script(handshake, true, std::iter::empty())
    }

    pub fn unreachable(handshake: Duration) -> Self {
        Self::with_script(handshake, false, std::iter::empty())
    }

    /// Outcomes for the first attempts, then `default` for every attempt after.
    pub fn with_script(
        handshake: Duration,
        default: bool,
        script: impl IntoIterator<Item = bool>,
    ) -> Self {
        Self {
            state: Arc::new(FakeState {
                connects: AtomicUsize::new(0),
                pings: AtomicUsize::new(0),
                ping_ok: AtomicBool::new(true),
                panic_next: AtomicBool::new(false),
                reachable_by_default: AtomicBool::new(default),
                script: Mutex::new(script.into_iter().collect()),
                handshake,
            }),
        }
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    pub fn set_ping_ok(&self, ok: bool) {
        self.state.ping_ok.store(ok, Ordering::SeqCst);
    }

    /// The next handshake panics instead of returning.
    pub fn panic_on_next_connect(&self) {
        self.state.panic_next.store(true, Ordering::SeqCst);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable_by_default.store(reachable, Ordering::SeqCst);
    }

    fn next_outcome(&self) -> bool {
        let scripted = self.state.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.state.reachable_by_default.load(Ordering::SeqCst))
    }
}

impl Connector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self) -> Result<FakeConnection, DbError> {
        let generation = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.state.handshake).await;
        if self.state.panic_next.swap(false, Ordering::SeqCst) {
            panic!("driver bug during handshake {generation}");
        }
        if self.next_outcome() {
            Ok(FakeConnection { generation })
        } else {
            Err(DbError::Unreachable("connection refused".to_string()))
        }
    }

    async fn ping(&self, _connection: &FakeConnection) -> Result<(), DbError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if self.state.ping_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DbError::Unreachable("connection reset".to_string()))
        }
    }
}

use actix_web::body::{to_bytes, MessageBody};
use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::test;

/// Calls the service and decodes the JSON body, whether the response came from
/// a handler or from a middleware rejecting the request.
pub async fn call_json<S, R, B>(app: &S, req: R) -> (StatusCode, serde_json::Value)
where
    S: Service<R, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    match test::try_call_service(app, req).await {
        Ok(resp) => {
            let status = resp.status();
            let body = test::read_body(resp).await;
            (status, serde_json::from_slice(&body).unwrap_or_default())
        }
        Err(err) => {
            let resp = err.error_response();
            let status = resp.status();
            let body = to_bytes(resp.into_body()).await.unwrap();
            (status, serde_json::from_slice(&body).unwrap_or_default())
        }
    }
}

use community_server::db::models::{normalize_email, Member};
use community_server::db::MemberStore;
use community_server::error::Result as AppResult;
use mongodb::bson::{oid::ObjectId, DateTime};

/// Member collection kept in memory.
#[derive(Clone, Default)]
pub struct InMemoryMembers {
    members: Arc<Mutex<Vec<Member>>>,
}

impl InMemoryMembers {
    pub fn with_member(name: &str, email: &str, password: &str) -> (Self, ObjectId) {
        let store = Self::default();
        let mut member = Member::new(name.to_string(), email, password).unwrap();
        let id = ObjectId::new();
        member.id = Some(id);
        store.members.lock().unwrap().push(member);
        (store, id)
    }

    pub fn get(&self, id: &ObjectId) -> Option<Member> {
        self.members
            .lock()
            .unwrap()
            .iter()
            .find(|member| member.id.as_ref() == Some(id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.members.lock().unwrap().len()
    }
}

impl MemberStore for InMemoryMembers {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<Member>> {
        let email = normalize_email(email);
        Ok(self
            .members
            .lock()
            .unwrap()
            .iter()
            .find(|member| member.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: &ObjectId) -> AppResult<Option<Member>> {
        Ok(self.get(id))
    }

    async fn update_last_login(&self, id: &ObjectId) -> AppResult<()> {
        let mut members = self.members.lock().unwrap();
        if let Some(member) = members.iter_mut().find(|m| m.id.as_ref() == Some(id)) {
            member.last_login = Some(DateTime::now());
        }
        Ok(())
    }

    async fn insert(&self, mut member: Member) -> AppResult<ObjectId> {
        let id = ObjectId::new();
        member.id = Some(id);
        self.members.lock().unwrap().push(member);
        Ok(id)
    }
}

/// Always-reachable connector handing out an [`InMemoryMembers`] store.
pub struct MemberConnector {
    members: InMemoryMembers,
}

impl MemberConnector {
    pub fn new(members: InMemoryMembers) -> Self {
        Self { members }
    }
}

impl Connector for MemberConnector {
    type Connection = InMemoryMembers;

    async fn connect(&self) -> Result<InMemoryMembers, DbError> {
        Ok(self.members.clone())
    }

    async fn ping(&self, _connection: &InMemoryMembers) -> Result<(), DbError> {
        Ok(())
    }
}
