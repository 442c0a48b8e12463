// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Flow Action State Machine
//!
//! Turns one decrypted action into a screen transition.
//!
//! | Action          | Needs session | Effect                                   |
//! |-----------------|---------------|------------------------------------------|
//! | `INIT`          | no            | create or restart the session            |
//! | `BACK`          | yes           | move to the requested screen             |
//! | `data_exchange` | yes           | record answers, route to the next screen |
//! | `complete`      | yes           | record answers, mark `COMPLETED`         |
//! | `ping`          | no            | fixed health payload, nothing persisted  |
//!
//! Every session write is a single atomic store operation keyed by session
//! id: INIT claims the id, and later actions update the session together with
//! their answer records, so two racing actions for one conversation never
//! lose an update. The engine holds no locks of its own and never deletes
//! sessions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::action::FlowAction;
use super::definition::{FlowCatalog, FlowDefinition, DEFAULT_FLOW_ID};
use crate::error::FlowError;
use crate::models::{FlowRequest, FlowResponse};
use crate::screen_data::ScreenDataProvider;
use crate::storage::{FlowAnswerRecord, FlowSession, SessionStore, COMPLETED_SCREEN};

/// Screen returned once a flow is complete.
pub const SUCCESS_SCREEN: &str = "SUCCESS";

/// Screen returned for the platform health check.
pub const HEALTH_CHECK_SCREEN: &str = "HEALTH_CHECK";

/// Who the request belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// `None` for unencrypted testing requests.
    pub tenant_id: Option<String>,
    pub default_flow_id: Option<String>,
}

pub struct FlowEngine {
    sessions: Arc<dyn SessionStore>,
    screen_data: Arc<ScreenDataProvider>,
    catalog: Arc<FlowCatalog>,
    session_ttl: chrono::Duration,
}

/// Where a session-bound action left the conversation.
struct Transition {
    session: FlowSession,
    from_screen: String,
    next_screen: Option<String>,
}

impl FlowEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        screen_data: Arc<ScreenDataProvider>,
        catalog: Arc<FlowCatalog>,
        session_ttl: chrono::Duration,
    ) -> Self {
        Self {
            sessions,
            screen_data,
            catalog,
            session_ttl,
        }
    }

    pub async fn handle(
        &self,
        ctx: &RequestContext,
        request: &FlowRequest,
    ) -> Result<FlowResponse, FlowError> {
        let action: FlowAction = request.action.parse()?;
        tracing::debug!(action = %action, tenant_id = ?ctx.tenant_id, "Handling flow action");

        match action {
            FlowAction::Init => self.init(ctx, request).await,
            FlowAction::Back => self.back(ctx, request).await,
            FlowAction::DataExchange => self.data_exchange(ctx, request).await,
            FlowAction::Complete => self.complete(ctx, request).await,
            FlowAction::Ping => Ok(self.ping(request)),
        }
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    async fn init(
        &self,
        ctx: &RequestContext,
        request: &FlowRequest,
    ) -> Result<FlowResponse, FlowError> {
        let flow_id = request
            .flow_id
            .clone()
            .or_else(|| ctx.default_flow_id.clone())
            .unwrap_or_else(|| DEFAULT_FLOW_ID.to_string());
        let definition = self.catalog.definition(&flow_id);

        let first_screen = definition
            .first_screen
            .clone()
            .or_else(|| request.screen.clone())
            .ok_or_else(|| FlowError::InvalidRequest("INIT requires a screen".to_string()))?;

        let session_id = new_or_given_session_id(request);
        let now = Utc::now();
        let session = FlowSession {
            session_id: session_id.clone(),
            tenant_id: ctx.tenant_id.clone(),
            flow_id,
            flow_token: request.flow_token.clone(),
            current_screen: first_screen.clone(),
            answers: Map::new(),
            created_at: now,
            updated_at: now,
            expires_at: now + self.session_ttl,
        };
        if !self.sessions.create_session(&session, now)? {
            tracing::warn!(
                session_id = %session_id,
                tenant_id = ?ctx.tenant_id,
                "INIT refused for a session owned by another tenant"
            );
            return Err(FlowError::SessionConflict(session_id));
        }
        tracing::info!(
            session_id = %session_id,
            flow_id = %session.flow_id,
            screen = %first_screen,
            "Flow session started"
        );

        let data = self.screen_data(definition, &first_screen).await;
        Ok(FlowResponse::new(first_screen, data, session_id))
    }

    async fn back(
        &self,
        ctx: &RequestContext,
        request: &FlowRequest,
    ) -> Result<FlowResponse, FlowError> {
        let session_id = existing_session_id(request)?;
        let target = request
            .screen
            .clone()
            .ok_or_else(|| FlowError::InvalidRequest("BACK requires a screen".to_string()))?;

        let now = Utc::now();
        let expires_at = now + self.session_ttl;
        let session = self
            .sessions
            .update_session(&session_id, now, &mut |session| {
                if !is_live_for(session, ctx) {
                    return false;
                }
                session.current_screen = target.clone();
                session.expires_at = expires_at;
                true
            })?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.clone()))?;

        let definition = self.catalog.definition(&session.flow_id);
        let data = self.screen_data(definition, &target).await;
        Ok(FlowResponse::new(target, data, session_id))
    }

    async fn data_exchange(
        &self,
        ctx: &RequestContext,
        request: &FlowRequest,
    ) -> Result<FlowResponse, FlowError> {
        let session_id = existing_session_id(request)?;
        let fields = request.fields();

        if fields.contains_key("error") {
            return self.acknowledge_error(ctx, request, &session_id, &fields);
        }

        let now = Utc::now();
        let transition = self.transition(ctx, &session_id, request, &fields, now, |def, from, sub| {
            def.route(from, sub)
        })?;

        match transition.next_screen {
            Some(next) => {
                tracing::debug!(
                    session_id = %session_id,
                    from = %transition.from_screen,
                    to = %next,
                    "Routed to next screen"
                );
                let definition = self.catalog.definition(&transition.session.flow_id);
                let data = self.screen_data(definition, &next).await;
                Ok(FlowResponse::new(next, data, session_id))
            }
            None => Ok(self.completion(&transition.session)),
        }
    }

    async fn complete(
        &self,
        ctx: &RequestContext,
        request: &FlowRequest,
    ) -> Result<FlowResponse, FlowError> {
        let session_id = existing_session_id(request)?;
        let fields = request.fields();

        let now = Utc::now();
        let transition = self.transition(ctx, &session_id, request, &fields, now, |_, _, _| None)?;

        Ok(self.completion(&transition.session))
    }

    fn ping(&self, request: &FlowRequest) -> FlowResponse {
        let session_id = request
            .session_id
            .clone()
            .or_else(|| request.flow_token.clone())
            .unwrap_or_default();
        let mut data = Map::new();
        data.insert("status".to_string(), json!("active"));
        FlowResponse::new(HEALTH_CHECK_SCREEN, data, session_id)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Merge `fields` into the session, move it along and append one answer
    /// record per field, all in one store transaction.
    ///
    /// `route` picks the next screen; `None` completes the session.
    fn transition<R>(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        request: &FlowRequest,
        fields: &Map<String, Value>,
        now: DateTime<Utc>,
        route: R,
    ) -> Result<Transition, FlowError>
    where
        R: Fn(&FlowDefinition, &str, &Map<String, Value>) -> Option<String>,
    {
        let expires_at = now + self.session_ttl;
        let mut from_screen = String::new();
        let mut next_screen = None;

        let session = self
            .sessions
            .update_session_with_answers(session_id, now, &mut |session| {
                if !is_live_for(session, ctx) {
                    return None;
                }
                from_screen = request
                    .screen
                    .clone()
                    .unwrap_or_else(|| session.current_screen.clone());

                for (field, value) in fields {
                    session.answers.insert(field.clone(), value.clone());
                }

                let definition = self.catalog.definition(&session.flow_id);
                next_screen = route(definition, &from_screen, fields);
                session.current_screen = next_screen
                    .clone()
                    .unwrap_or_else(|| COMPLETED_SCREEN.to_string());
                session.expires_at = expires_at;
                Some(answer_records(session, &from_screen, fields, now))
            })?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))?;

        if next_screen.is_none() {
            tracing::info!(session_id = %session_id, "Flow session completed");
        }

        Ok(Transition {
            session,
            from_screen,
            next_screen,
        })
    }

    /// Platform error notification: acknowledged, nothing persisted.
    fn acknowledge_error(
        &self,
        ctx: &RequestContext,
        request: &FlowRequest,
        session_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<FlowResponse, FlowError> {
        let screen = match request.screen.clone() {
            Some(screen) => screen,
            None => self
                .sessions
                .get_session(session_id)?
                .filter(|s| is_live_for(s, ctx) && !s.is_expired(Utc::now()))
                .map(|s| s.current_screen)
                .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))?,
        };

        tracing::warn!(
            session_id = %session_id,
            screen = %screen,
            error = %fields.get("error").map(|v| v.to_string()).unwrap_or_default(),
            "Platform reported a flow error"
        );

        let mut data = Map::new();
        data.insert("acknowledged".to_string(), json!(true));
        Ok(FlowResponse::new(screen, data, session_id))
    }

    fn completion(&self, session: &FlowSession) -> FlowResponse {
        let mut params = session.answers.clone();
        if let Some(token) = &session.flow_token {
            params.insert("flow_token".to_string(), json!(token));
        }

        let mut data = Map::new();
        data.insert(
            "extension_message_response".to_string(),
            json!({ "params": params }),
        );
        FlowResponse::new(SUCCESS_SCREEN, data, session.session_id.clone())
    }

    async fn screen_data(
        &self,
        definition: &FlowDefinition,
        screen_id: &str,
    ) -> Map<String, Value> {
        self.screen_data.resolve(definition.screen(screen_id)).await
    }
}

/// One append-only record per submitted field, snapshotting the merged answers.
fn answer_records(
    session: &FlowSession,
    screen: &str,
    fields: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Vec<FlowAnswerRecord> {
    fields
        .iter()
        .map(|(field, value)| FlowAnswerRecord {
            record_id: Uuid::new_v4().to_string(),
            session_id: session.session_id.clone(),
            tenant_id: session.tenant_id.clone(),
            flow_id: session.flow_id.clone(),
            screen: screen.to_string(),
            field: field.clone(),
            value: value.clone(),
            answers_snapshot: session.answers.clone(),
            submitted_at: now,
        })
        .collect()
}

/// Session id from the request, else its flow token, else a fresh one.
fn new_or_given_session_id(request: &FlowRequest) -> String {
    request
        .session_id
        .clone()
        .or_else(|| request.flow_token.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn existing_session_id(request: &FlowRequest) -> Result<String, FlowError> {
    request
        .session_id
        .clone()
        .or_else(|| request.flow_token.clone())
        .ok_or_else(|| FlowError::InvalidRequest("session_id is required".to_string()))
}

/// Session belongs to the requesting tenant and is not finished.
fn is_live_for(session: &FlowSession, ctx: &RequestContext) -> bool {
    session.tenant_id == ctx.tenant_id && !session.is_completed()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::screen_data::ScreenDataSettings;
    use crate::storage::database::test_database;
    use crate::storage::{AnswerStore, FlowDatabase, StorageError, StorageResult};

    pub(crate) fn test_catalog() -> FlowCatalog {
        let flow: FlowDefinition = serde_json::from_value(json!({
            "flow_id": "default",
            "first_screen": "FORM",
            "screens": [{"id": "FORM", "data": {"heading": "Where do you live?"}}]
        }))
        .unwrap();
        let routed: FlowDefinition = serde_json::from_value(json!({
            "flow_id": "routed",
            "first_screen": "START",
            "screens": [
                {
                    "id": "START",
                    "routes": [{"field": "plan", "equals": "pro", "next": "BILLING"}],
                    "next": "DONE"
                },
                {"id": "BILLING", "data": {"currency": "EUR"}},
                {"id": "DONE"}
            ]
        }))
        .unwrap();
        FlowCatalog::from_definitions(vec![flow, routed]).unwrap()
    }

    pub(crate) fn test_engine(db: Arc<FlowDatabase>) -> FlowEngine {
        engine_with_sessions(db.clone(), db)
    }

    fn engine_with_sessions(sessions: Arc<dyn SessionStore>, db: Arc<FlowDatabase>) -> FlowEngine {
        let provider = ScreenDataProvider::new(db, ScreenDataSettings::default()).unwrap();
        FlowEngine::new(
            sessions,
            Arc::new(provider),
            Arc::new(test_catalog()),
            chrono::Duration::hours(1),
        )
    }

    fn tenant_ctx() -> RequestContext {
        RequestContext {
            tenant_id: Some("tenant-a".into()),
            default_flow_id: None,
        }
    }

    fn request(
        action: &str,
        session_id: Option<&str>,
        screen: Option<&str>,
        data: Value,
    ) -> FlowRequest {
        FlowRequest {
            version: Some("3.0".into()),
            action: action.into(),
            screen: screen.map(str::to_string),
            data: Some(data),
            flow_token: Some("tok-1".into()),
            session_id: session_id.map(str::to_string),
            flow_id: None,
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<FlowDatabase>, FlowEngine) {
        let (dir, db) = test_database();
        let db = Arc::new(db);
        let engine = test_engine(db.clone());
        (dir, db, engine)
    }

    #[tokio::test]
    async fn init_creates_session_on_first_screen() {
        let (_dir, db, engine) = setup();
        let response = engine
            .handle(&tenant_ctx(), &request("INIT", Some("s-1"), None, json!({})))
            .await
            .unwrap();

        assert_eq!(response.screen, "FORM");
        assert_eq!(response.session_id, "s-1");
        assert_eq!(response.version, "3.0");
        assert_eq!(response.data["heading"], json!("Where do you live?"));

        let session = db.get_session("s-1").unwrap().unwrap();
        assert_eq!(session.current_screen, "FORM");
        assert_eq!(session.tenant_id.as_deref(), Some("tenant-a"));
        assert_eq!(session.flow_token.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn init_without_session_id_uses_flow_token_or_generates_one() {
        let (_dir, db, engine) = setup();
        let response = engine
            .handle(&tenant_ctx(), &request("INIT", None, None, json!({})))
            .await
            .unwrap();
        assert_eq!(response.session_id, "tok-1");

        let mut anonymous = request("INIT", None, None, json!({}));
        anonymous.flow_token = None;
        let response = engine.handle(&tenant_ctx(), &anonymous).await.unwrap();
        assert!(!response.session_id.is_empty());
        assert!(db.get_session(&response.session_id).unwrap().is_some());
    }

    #[tokio::test]
    async fn init_for_unknown_flow_uses_requested_screen() {
        let (_dir, _db, engine) = setup();
        let mut init = request("INIT", Some("s-1"), Some("WELCOME"), json!({}));
        init.flow_id = Some("unlisted".into());
        let response = engine.handle(&tenant_ctx(), &init).await.unwrap();
        assert_eq!(response.screen, "WELCOME");

        init.screen = None;
        let err = engine.handle(&tenant_ctx(), &init).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn data_exchange_without_route_completes() {
        let (_dir, db, engine) = setup();
        engine
            .handle(&tenant_ctx(), &request("INIT", Some("s-1"), None, json!({})))
            .await
            .unwrap();

        let response = engine
            .handle(
                &tenant_ctx(),
                &request("data_exchange", Some("s-1"), Some("FORM"), json!({"country": "US"})),
            )
            .await
            .unwrap();

        assert_eq!(response.screen, SUCCESS_SCREEN);
        assert_eq!(response.session_id, "s-1");
        let params = &response.data["extension_message_response"]["params"];
        assert_eq!(params["country"], json!("US"));
        assert_eq!(params["flow_token"], json!("tok-1"));

        let session = db.get_session("s-1").unwrap().unwrap();
        assert!(session.is_completed());

        let answers = db.list_answers("s-1").unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].field, "country");
        assert_eq!(answers[0].value, json!("US"));
        assert_eq!(answers[0].screen, "FORM");
    }

    #[tokio::test]
    async fn data_exchange_follows_routes() {
        let (_dir, db, engine) = setup();
        let mut init = request("INIT", Some("s-2"), None, json!({}));
        init.flow_id = Some("routed".into());
        assert_eq!(engine.handle(&tenant_ctx(), &init).await.unwrap().screen, "START");

        let response = engine
            .handle(
                &tenant_ctx(),
                &request("data_exchange", Some("s-2"), None, json!({"plan": "pro"})),
            )
            .await
            .unwrap();
        assert_eq!(response.screen, "BILLING");
        assert_eq!(response.data["currency"], json!("EUR"));
        assert_eq!(db.get_session("s-2").unwrap().unwrap().current_screen, "BILLING");
    }

    #[tokio::test]
    async fn back_moves_to_requested_screen() {
        let (_dir, db, engine) = setup();
        let mut init = request("INIT", Some("s-3"), None, json!({}));
        init.flow_id = Some("routed".into());
        engine.handle(&tenant_ctx(), &init).await.unwrap();
        engine
            .handle(
                &tenant_ctx(),
                &request("data_exchange", Some("s-3"), None, json!({"plan": "pro"})),
            )
            .await
            .unwrap();

        let response = engine
            .handle(&tenant_ctx(), &request("BACK", Some("s-3"), Some("START"), json!({})))
            .await
            .unwrap();
        assert_eq!(response.screen, "START");
        assert_eq!(db.get_session("s-3").unwrap().unwrap().current_screen, "START");
    }

    #[tokio::test]
    async fn back_without_session_fails_and_writes_nothing() {
        let (_dir, db, engine) = setup();
        let err = engine
            .handle(&tenant_ctx(), &request("BACK", Some("ghost"), Some("FORM"), json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::SessionNotFound(id) if id == "ghost"));
        assert!(db.get_session("ghost").unwrap().is_none());
        assert!(db.list_answers("ghost").unwrap().is_empty());
    }

    #[tokio::test]
    async fn resubmitting_a_field_appends_a_second_record() {
        let (_dir, db, engine) = setup();
        let mut init = request("INIT", Some("s-4"), None, json!({}));
        init.flow_id = Some("routed".into());
        engine.handle(&tenant_ctx(), &init).await.unwrap();

        for plan in ["pro", "pro"] {
            engine
                .handle(
                    &tenant_ctx(),
                    &request("data_exchange", Some("s-4"), Some("START"), json!({"plan": plan})),
                )
                .await
                .unwrap();
        }

        let answers = db.list_answers("s-4").unwrap();
        assert_eq!(answers.len(), 2);
        assert_ne!(answers[0].record_id, answers[1].record_id);
        assert_eq!(answers[1].answers_snapshot["plan"], json!("pro"));
    }

    #[tokio::test]
    async fn complete_marks_session_completed() {
        let (_dir, db, engine) = setup();
        let mut init = request("INIT", Some("s-5"), None, json!({}));
        init.flow_id = Some("routed".into());
        engine.handle(&tenant_ctx(), &init).await.unwrap();

        let response = engine
            .handle(
                &tenant_ctx(),
                &request(
                    "complete",
                    Some("s-5"),
                    Some("START"),
                    json!({"plan": "pro", "seats": 3}),
                ),
            )
            .await
            .unwrap();
        assert_eq!(response.screen, SUCCESS_SCREEN);

        let session = db.get_session("s-5").unwrap().unwrap();
        assert_eq!(session.current_screen, COMPLETED_SCREEN);
        assert_eq!(db.list_answers("s-5").unwrap().len(), 2);

        // completed sessions take no further actions
        let err = engine
            .handle(&tenant_ctx(), &request("BACK", Some("s-5"), Some("START"), json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn other_tenants_session_is_not_found() {
        let (_dir, _db, engine) = setup();
        engine
            .handle(&tenant_ctx(), &request("INIT", Some("s-6"), None, json!({})))
            .await
            .unwrap();

        let intruder = RequestContext {
            tenant_id: Some("tenant-b".into()),
            default_flow_id: None,
        };
        let err = engine
            .handle(&intruder, &request("data_exchange", Some("s-6"), None, json!({"x": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn expired_session_is_not_found() {
        let (_dir, db, engine) = setup();
        let mut session = crate::storage::sessions::sample_session("s-7", Utc::now());
        session.expires_at = Utc::now() - chrono::Duration::seconds(1);
        db.create_session(&session, Utc::now()).unwrap();

        let err = engine
            .handle(&tenant_ctx(), &request("data_exchange", Some("s-7"), None, json!({"x": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::SessionNotFound(_)));
        assert!(db.list_answers("s-7").unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_notification_is_acknowledged_without_writes() {
        let (_dir, db, engine) = setup();
        engine
            .handle(&tenant_ctx(), &request("INIT", Some("s-8"), None, json!({})))
            .await
            .unwrap();

        let response = engine
            .handle(
                &tenant_ctx(),
                &request(
                    "data_exchange",
                    Some("s-8"),
                    None,
                    json!({"error": "timeout", "error_message": "x"}),
                ),
            )
            .await
            .unwrap();
        assert_eq!(response.screen, "FORM");
        assert_eq!(response.data["acknowledged"], json!(true));
        assert!(db.list_answers("s-8").unwrap().is_empty());
        assert!(db.get_session("s-8").unwrap().unwrap().answers.is_empty());
    }

    #[tokio::test]
    async fn ping_and_unknown_actions() {
        let (_dir, db, engine) = setup();
        let response = engine
            .handle(&RequestContext::default(), &request("ping", None, None, json!({})))
            .await
            .unwrap();
        assert_eq!(response.screen, HEALTH_CHECK_SCREEN);
        assert_eq!(response.data["status"], json!("active"));
        assert!(db.get_session("tok-1").unwrap().is_none());

        let err = engine
            .handle(&tenant_ctx(), &request("teleport", Some("s-1"), None, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::UnknownAction(_)));
    }

    #[tokio::test]
    async fn tenant_default_flow_is_used() {
        let (_dir, _db, engine) = setup();
        let ctx = RequestContext {
            tenant_id: Some("tenant-a".into()),
            default_flow_id: Some("routed".into()),
        };
        let response = engine
            .handle(&ctx, &request("INIT", Some("s-9"), None, json!({})))
            .await
            .unwrap();
        assert_eq!(response.screen, "START");
    }

    fn tenant(id: &str) -> RequestContext {
        RequestContext {
            tenant_id: Some(id.into()),
            default_flow_id: None,
        }
    }

    #[tokio::test]
    async fn init_cannot_take_over_another_tenants_session() {
        let (_dir, db, engine) = setup();
        let init = request("INIT", Some("s-shared"), None, json!({}));
        engine.handle(&tenant("tenant-a"), &init).await.unwrap();

        let err = engine.handle(&tenant("tenant-b"), &init).await.unwrap_err();
        assert!(matches!(err, FlowError::SessionConflict(ref id) if id == "s-shared"));
        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);

        let err = engine
            .handle(&RequestContext::default(), &init)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::SessionConflict(_)));

        let session = db.get_session("s-shared").unwrap().unwrap();
        assert_eq!(session.tenant_id.as_deref(), Some("tenant-a"));

        let response = engine
            .handle(
                &tenant("tenant-a"),
                &request("data_exchange", Some("s-shared"), None, json!({"country": "US"})),
            )
            .await
            .unwrap();
        assert_eq!(response.screen, SUCCESS_SCREEN);
    }

    #[tokio::test]
    async fn init_restarts_own_session() {
        let (_dir, db, engine) = setup();
        let mut init = request("INIT", Some("s-10"), None, json!({}));
        init.flow_id = Some("routed".into());
        engine.handle(&tenant_ctx(), &init).await.unwrap();
        engine
            .handle(
                &tenant_ctx(),
                &request("data_exchange", Some("s-10"), None, json!({"plan": "pro"})),
            )
            .await
            .unwrap();

        let response = engine.handle(&tenant_ctx(), &init).await.unwrap();
        assert_eq!(response.screen, "START");
        let session = db.get_session("s-10").unwrap().unwrap();
        assert_eq!(session.current_screen, "START");
        assert!(session.answers.is_empty());
    }

    /// Session store whose answer writes are always misfiled, so the
    /// combined transaction fails after the session was mutated.
    struct MisfiledAnswers(Arc<FlowDatabase>);

    impl SessionStore for MisfiledAnswers {
        fn get_session(&self, session_id: &str) -> StorageResult<Option<FlowSession>> {
            self.0.get_session(session_id)
        }

        fn create_session(&self, session: &FlowSession, now: DateTime<Utc>) -> StorageResult<bool> {
            self.0.create_session(session, now)
        }

        fn update_session(
            &self,
            session_id: &str,
            now: DateTime<Utc>,
            apply: &mut dyn FnMut(&mut FlowSession) -> bool,
        ) -> StorageResult<Option<FlowSession>> {
            self.0.update_session(session_id, now, apply)
        }

        fn update_session_with_answers(
            &self,
            session_id: &str,
            now: DateTime<Utc>,
            apply: &mut dyn FnMut(&mut FlowSession) -> Option<Vec<FlowAnswerRecord>>,
        ) -> StorageResult<Option<FlowSession>> {
            self.0.update_session_with_answers(session_id, now, &mut |session| {
                let mut records = apply(session)?;
                for record in &mut records {
                    record.session_id = "misfiled".to_string();
                }
                Some(records)
            })
        }

        fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
            self.0.purge_expired(now)
        }
    }

    #[tokio::test]
    async fn failed_answer_write_keeps_session_in_place() {
        let (_dir, db) = test_database();
        let db = Arc::new(db);
        let failing = engine_with_sessions(Arc::new(MisfiledAnswers(db.clone())), db.clone());
        failing
            .handle(&tenant_ctx(), &request("INIT", Some("s-11"), None, json!({})))
            .await
            .unwrap();

        let exchange = request(
            "data_exchange",
            Some("s-11"),
            Some("FORM"),
            json!({"country": "US"}),
        );
        let err = failing.handle(&tenant_ctx(), &exchange).await.unwrap_err();
        assert!(matches!(err, FlowError::Storage(StorageError::InvalidRecord(_))));

        let session = db.get_session("s-11").unwrap().unwrap();
        assert_eq!(session.current_screen, "FORM");
        assert!(session.answers.is_empty());
        assert!(db.list_answers("s-11").unwrap().is_empty());
        assert!(db.list_answers("misfiled").unwrap().is_empty());

        // the platform's retry goes through once the store recovers
        let response = test_engine(db.clone())
            .handle(&tenant_ctx(), &exchange)
            .await
            .unwrap();
        assert_eq!(response.screen, SUCCESS_SCREEN);
        assert_eq!(db.list_answers("s-11").unwrap().len(), 1);
    }
}
