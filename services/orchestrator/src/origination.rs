//! Origination pipeline (spec.md §4.6): validate, insert PENDING, call the
//! circuit-broken PBX, settle to DIALING or FAILED. Grounded on
//! `original_source/app/services/call_service.py`'s `create_outbound_call`,
//! with the optimistic-concurrency write path from `db::calls` replacing
//! the original's unguarded `session.commit()`.

use std::sync::Arc;
use std::time::Instant;

use dto::{CreateCallRequest, OriginateResponse};
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreaker;
use crate::db::calls::NewCall;
use crate::db::CallsRepository;
use crate::error::{ApiError, ApiResult};
use crate::pbx::PbxRestClient;
use crate::validation::{
    sanitize_caller_id, validate_context, validate_extension, validate_phone_number,
    validate_priority, validate_timeout_ms,
};

pub struct OriginationPipeline {
    calls: CallsRepository,
    pbx: PbxRestClient,
    breaker: Arc<CircuitBreaker>,
    default_context: String,
    default_extension: String,
    default_priority: i32,
    default_timeout_ms: i32,
    default_caller_id: String,
    default_max_attempts: i32,
}

impl OriginationPipeline {
    pub fn new(
        calls: CallsRepository,
        pbx: PbxRestClient,
        breaker: Arc<CircuitBreaker>,
        default_context: String,
        default_extension: String,
        default_priority: i32,
        default_timeout_ms: i32,
        default_caller_id: String,
    ) -> Self {
        Self {
            calls,
            pbx,
            breaker,
            default_context,
            default_extension,
            default_priority,
            default_timeout_ms,
            default_caller_id,
            default_max_attempts: 1,
        }
    }

    pub async fn originate(&self, request: CreateCallRequest) -> ApiResult<OriginateResponse> {
        let phone_number =
            validate_phone_number(&request.phone_number).map_err(ApiError::Validation)?;

        let context = match &request.overrides.context {
            Some(c) => validate_context(c).map_err(ApiError::Validation)?,
            None => self.default_context.clone(),
        };
        let extension = match &request.overrides.extension {
            Some(e) => validate_extension(e).map_err(ApiError::Validation)?,
            None => self.default_extension.clone(),
        };
        let priority = match request.overrides.priority {
            Some(p) => validate_priority(p).map_err(ApiError::Validation)?,
            None => self.default_priority,
        };
        let timeout_ms = match request.overrides.timeout_ms {
            Some(t) => validate_timeout_ms(t).map_err(ApiError::Validation)?,
            None => self.default_timeout_ms,
        };
        let caller_id = sanitize_caller_id(
            request
                .overrides
                .caller_id
                .as_deref()
                .unwrap_or(&self.default_caller_id),
        );

        let call_id = Uuid::new_v4();
        let call = self
            .calls
            .insert_pending(NewCall {
                call_id,
                phone_number: phone_number.clone(),
                caller_id: caller_id.clone(),
                context: context.clone(),
                extension: extension.clone(),
                priority,
                timeout_ms,
                max_attempts: self.default_max_attempts,
                call_metadata: request.overrides.variables.clone(),
            })
            .await
            .map_err(ApiError::Infrastructure)?;

        let started = Instant::now();
        let breaker_result = self
            .breaker
            .call(|| async {
                let outcome = self
                    .pbx
                    .originate(
                        &phone_number,
                        Some(&context),
                        Some(&extension),
                        Some(priority),
                        Some(timeout_ms),
                        Some(&caller_id),
                        request.overrides.variables.as_ref(),
                    )
                    .await;
                if outcome.ok {
                    Ok(outcome)
                } else {
                    Err(outcome)
                }
            })
            .await;
        let latency_ms = started.elapsed().as_millis();

        match breaker_result {
            Ok(Ok(outcome)) => {
                self.calls
                    .mark_dialing(call.call_id, &outcome.channel_id.to_string(), call.version)
                    .await
                    .map_err(ApiError::Infrastructure)?;

                Ok(OriginateResponse {
                    success: true,
                    call_id: call.call_id,
                    phone_number,
                    status: "dialing".to_string(),
                    channel: Some(outcome.channel_id.to_string()),
                    created_at: call.created_at,
                    message: "Call originated".to_string(),
                    error: None,
                })
            }
            Ok(Err(outcome)) => {
                let reason = outcome.error.unwrap_or_else(|| "PBX originate failed".to_string());
                self.calls
                    .mark_failed(call.call_id, &reason, call.version)
                    .await
                    .map_err(ApiError::Infrastructure)?;

                Ok(OriginateResponse {
                    success: false,
                    call_id: call.call_id,
                    phone_number,
                    status: "failed".to_string(),
                    channel: None,
                    created_at: call.created_at,
                    message: "Call origination failed".to_string(),
                    error: Some(reason),
                })
            }
            Err(breaker_open) => {
                tracing::warn!(
                    error = %breaker_open,
                    latency_ms,
                    call_id = %call.call_id,
                    "origination circuit open, returning degraded response"
                );
                self.calls
                    .mark_failed(call.call_id, "PBX temporarily unavailable", call.version)
                    .await
                    .map_err(ApiError::Infrastructure)?;

                Ok(OriginateResponse {
                    success: false,
                    call_id: call.call_id,
                    phone_number,
                    status: "failed".to_string(),
                    channel: None,
                    created_at: call.created_at,
                    message: "Service temporarily unavailable".to_string(),
                    error: Some("Service temporarily unavailable".to_string()),
                })
            }
        }
    }

    pub async fn status_of(&self, call_id: Uuid) -> ApiResult<models::Call> {
        self.calls
            .find_by_call_id(call_id)
            .await
            .map_err(ApiError::Infrastructure)?
            .ok_or(ApiError::NotFound)
    }
}
