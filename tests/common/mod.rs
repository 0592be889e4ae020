#![allow(dead_code)]

use axum::{
    Router,
    extract::{Path, State},
    http::HeaderMap,
};
use querycrate::{
    ApiError, CURRENT_CALLER, Caller, CallerId, Controller, ControllerConfig, EntitySchema, FieldDescriptor,
    LazyFilters, PageResponse, QueryParams, SeaOrmCollection,
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, Database, DatabaseConnection, DbErr};
use sea_orm_migration::prelude::*;
use std::sync::Arc;

pub mod group_entity;
pub mod user_entity;

pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect("sqlite::memory:").await?;

    // Run migrations
    Migrator::up(&db, None).await?;

    Ok(db)
}

/// Test database with three groups and five users.
pub async fn setup_seeded_db() -> Result<DatabaseConnection, DbErr> {
    let db = setup_test_db().await?;

    for (id, name) in [(1, "admins"), (2, "staff"), (3, "empty")] {
        group_entity::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
        }
        .insert(&db)
        .await?;
    }

    let users = [
        (1, "alice", Some("likes bob"), true, Some(1)),
        (2, "bob", Some("likes alice"), false, Some(2)),
        (3, "carol", None, true, Some(1)),
        (4, "dave", Some("100% committed"), true, None),
        (5, "erin", Some("quiet"), false, Some(2)),
    ];
    for (id, name, bio, active, group_id) in users {
        user_entity::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            bio: Set(bio.map(ToString::to_string)),
            active: Set(active),
            password: Set(format!("hash-{name}")),
            group_id: Set(group_id),
        }
        .insert(&db)
        .await?;
    }

    Ok(db)
}

pub struct Schemas {
    pub users: Arc<EntitySchema>,
    pub groups: Arc<EntitySchema>,
}

/// `users.group` points at groups, `groups.members` back at users.
pub fn schemas() -> Schemas {
    let plain_groups = Arc::new(EntitySchema::from_entity::<group_entity::Entity>());
    let users = Arc::new(
        EntitySchema::from_entity::<user_entity::Entity>()
            .field(FieldDescriptor::foreign_key("group", "group_id", &plain_groups)),
    );
    let groups = Arc::new(
        EntitySchema::from_entity::<group_entity::Entity>().reverse_relation("members", &users, "group_id"),
    );
    Schemas { users, groups }
}

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub schema: Arc<EntitySchema>,
    pub users: Arc<Controller>,
    pub groupmates: Arc<Controller>,
}

fn caller(headers: &HeaderMap) -> Option<CallerId> {
    headers
        .get("x-group")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .map(CallerId::new)
}

async fn list_users(State(state): State<AppState>, params: QueryParams) -> Result<PageResponse, ApiError> {
    let base = SeaOrmCollection::<user_entity::Entity>::new(state.db.clone(), state.schema.clone());
    state.users.get_serialized(None, params, base).await
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let base = SeaOrmCollection::<user_entity::Entity>::new(state.db.clone(), state.schema.clone());
    let user = state.users.find_one(None, base, id).await?;
    Ok(axum::Json(serde_json::to_value(user).map_err(|e| ApiError::internal("serialization", Some(e.to_string())))?))
}

async fn list_groupmates(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: QueryParams,
) -> Result<PageResponse, ApiError> {
    let caller = caller(&headers);
    let caller: Option<&dyn Caller> = caller.as_ref().map(|c| c as &dyn Caller);
    let base = SeaOrmCollection::<user_entity::Entity>::new(state.db.clone(), state.schema.clone());
    state
        .groupmates
        .get_serialized(caller, params, base)
        .await
}

pub fn setup_test_app(db: DatabaseConnection) -> Router {
    let schemas = schemas();
    let users = Controller::new(schemas.users.clone(), ControllerConfig::default()).expect("valid config");
    let groupmates = users
        .clone()
        .with_force_filter(LazyFilters::new().filter_by("group", CURRENT_CALLER));

    let state = AppState {
        db,
        schema: schemas.users,
        users: Arc::new(users),
        groupmates: Arc::new(groupmates),
    };

    let api = Router::new()
        .route("/users", axum::routing::get(list_users))
        .route("/users/{id}", axum::routing::get(get_user))
        .route("/groupmates", axum::routing::get(list_groupmates))
        .with_state(state);

    Router::new().nest("/api/v1", api)
}

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(CreateGroupTable), Box::new(CreateUserTable)]
    }
}

pub struct CreateGroupTable;

#[async_trait::async_trait]
impl MigrationName for CreateGroupTable {
    fn name(&self) -> &'static str {
        "m20240101_000001_create_group_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for CreateGroupTable {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let table = Table::create()
            .table(GroupTable)
            .if_not_exists()
            .col(
                ColumnDef::new(GroupColumn::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(ColumnDef::new(GroupColumn::Name).string().not_null())
            .to_owned();

        manager.create_table(table).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(GroupTable).to_owned())
            .await?;
        Ok(())
    }
}

pub struct CreateUserTable;

#[async_trait::async_trait]
impl MigrationName for CreateUserTable {
    fn name(&self) -> &'static str {
        "m20240101_000002_create_user_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for CreateUserTable {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let table = Table::create()
            .table(UserTable)
            .if_not_exists()
            .col(
                ColumnDef::new(UserColumn::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(ColumnDef::new(UserColumn::Name).string().not_null())
            .col(ColumnDef::new(UserColumn::Bio).text().null())
            .col(
                ColumnDef::new(UserColumn::Active)
                    .boolean()
                    .not_null()
                    .default(true),
            )
            .col(ColumnDef::new(UserColumn::Password).string().not_null())
            .col(ColumnDef::new(UserColumn::GroupId).integer().null())
            .to_owned();

        manager.create_table(table).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserTable).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum GroupColumn {
    Id,
    Name,
}

impl Iden for GroupColumn {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(
            s,
            "{}",
            match self {
                Self::Id => "id",
                Self::Name => "name",
            }
        )
        .unwrap();
    }
}

#[derive(Debug)]
pub struct GroupTable;

impl Iden for GroupTable {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "groups").unwrap();
    }
}

#[derive(Debug)]
pub enum UserColumn {
    Id,
    Name,
    Bio,
    Active,
    Password,
    GroupId,
}

impl Iden for UserColumn {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(
            s,
            "{}",
            match self {
                Self::Id => "id",
                Self::Name => "name",
                Self::Bio => "bio",
                Self::Active => "active",
                Self::Password => "password",
                Self::GroupId => "group_id",
            }
        )
        .unwrap();
    }
}

#[derive(Debug)]
pub struct UserTable;

impl Iden for UserTable {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "users").unwrap();
    }
}
