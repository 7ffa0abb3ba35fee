use std::future::Future;

use mongodb::{
    bson::{doc, oid::ObjectId, DateTime as BsonDateTime},
    Collection, Database,
};

use super::models::{normalize_email, Member};
use crate::error::{AppError, Result};

/// Member lookups the auth handlers depend on.
pub trait MemberStore: Clone + 'static {
    fn find_by_email(&self, email: &str) -> impl Future<Output = Result<Option<Member>>>;

    fn find_by_id(&self, id: &ObjectId) -> impl Future<Output = Result<Option<Member>>>;

    fn update_last_login(&self, id: &ObjectId) -> impl Future<Output = Result<()>>;

    /// Stores a new member and returns its id.
    fn insert(&self, member: Member) -> impl Future<Output = Result<ObjectId>>;
}

#[derive(Clone)]
pub struct MemberRepository {
    collection: Collection<Member>,
}

impl MemberRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("users"),
        }
    }

    pub async fn init_indexes(&self) -> Result<()> {
        use mongodb::options::IndexOptions;
        use mongodb::IndexModel;

        let email_index = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        self.collection.create_index(email_index).await?;

        log::info!("Member indexes created successfully");
        Ok(())
    }
}

impl MemberStore for MemberRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<Member>> {
        let member = self
            .collection
            .find_one(doc! { "email": normalize_email(email) })
            .await?;
        Ok(member)
    }

    async fn find_by_id(&self, id: &ObjectId) -> Result<Option<Member>> {
        let member = self.collection.find_one(doc! { "_id": id }).await?;
        Ok(member)
    }

    async fn update_last_login(&self, id: &ObjectId) -> Result<()> {
        let now = BsonDateTime::now();
        self.collection
            .update_one(doc! { "_id": id }, doc! { "$set": { "last_login": now } })
            .await?;
        Ok(())
    }

    async fn insert(&self, member: Member) -> Result<ObjectId> {
        let inserted = self.collection.insert_one(member).await?;
        inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| AppError::Internal("Inserted member has no ObjectId".to_string()))
    }
}
