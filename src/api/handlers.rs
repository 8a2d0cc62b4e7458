use crate::api::AppContext;
use crate::api::error::ApiError;
use crate::domain::{CommandKind, DpValue, Payload, Rgb};
use crate::effects::effect::MAX_BRIGHTNESS;
use crate::effects::effect_registry::known_effects;
use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::info;

pub type ApiResult = Result<Json<Value>, ApiError>;

fn ok(data: Value) -> ApiResult {
    Ok(Json(json!({ "ok": true, "data": data })))
}

#[derive(Deserialize)]
pub struct PowerRequest {
    on: bool,
}

#[derive(Deserialize)]
pub struct ModeRequest {
    mode: String,
}

#[derive(Deserialize)]
pub struct ValueRequest {
    value: i64,
}

#[derive(Deserialize)]
pub struct WhiteRequest {
    brightness: Option<i64>,
    temperature: Option<i64>,
}

#[derive(Deserialize)]
pub struct ColorRequest {
    hex: String,
    #[serde(default = "full_brightness")]
    brightness: u16,
}

fn full_brightness() -> u16 {
    MAX_BRIGHTNESS
}

#[derive(Deserialize)]
pub struct DpsRequest {
    dps: BTreeMap<u16, DpValue>,
    #[serde(default)]
    urgent: bool,
}

#[derive(Deserialize)]
pub struct SceneRequest {
    data: String,
}

pub async fn status(State(context): State<AppContext>) -> ApiResult {
    let connection = context.lamp.connection_state();
    ok(json!({
        "connection": connection,
        "connected": connection.is_connected(),
        "queueLength": context.lamp.queue_len(),
        "activeEffect": context.effects.active().await,
    }))
}

pub async fn power(State(context): State<AppContext>, body: Result<Json<PowerRequest>, JsonRejection>) -> ApiResult {
    let Json(request) = body?;
    if request.on {
        context.lamp.turn_on()?;
    } else {
        // A running effect would turn the lamp back on with its next colour
        context.effects.stop_all().await;
        context.lamp.turn_off()?;
    }
    ok(json!({ "on": request.on }))
}

pub async fn mode(State(context): State<AppContext>, body: Result<Json<ModeRequest>, JsonRejection>) -> ApiResult {
    let Json(request) = body?;
    context.lamp.set_mode(&request.mode)?;
    ok(json!({ "mode": request.mode }))
}

pub async fn brightness(State(context): State<AppContext>, body: Result<Json<ValueRequest>, JsonRejection>) -> ApiResult {
    let Json(request) = body?;
    context.lamp.set_brightness(request.value)?;
    ok(json!({ "value": request.value }))
}

pub async fn temperature(State(context): State<AppContext>, body: Result<Json<ValueRequest>, JsonRejection>) -> ApiResult {
    let Json(request) = body?;
    context.lamp.set_temperature(request.value)?;
    ok(json!({ "value": request.value }))
}

/// Either setting may be left out, with both the lamp switches to white mode first.
pub async fn white(State(context): State<AppContext>, body: Result<Json<WhiteRequest>, JsonRejection>) -> ApiResult {
    let Json(request) = body?;
    match (request.brightness, request.temperature) {
        (Some(brightness), Some(temperature)) => context.lamp.set_white(brightness, temperature)?,
        (Some(brightness), None) => context.lamp.set_brightness(brightness)?,
        (None, Some(temperature)) => context.lamp.set_temperature(temperature)?,
        (None, None) => {
            return Err(ApiError::BadRequest("expected 'brightness' and/or 'temperature'".to_string()));
        }
    }
    ok(json!({ "brightness": request.brightness, "temperature": request.temperature }))
}

pub async fn color(State(context): State<AppContext>, body: Result<Json<ColorRequest>, JsonRejection>) -> ApiResult {
    let Json(request) = body?;
    if request.brightness > MAX_BRIGHTNESS {
        return Err(ApiError::BadRequest(format!(
            "brightness {} is outside 0..={}",
            request.brightness, MAX_BRIGHTNESS
        )));
    }

    let colour = Rgb::from_hex(&request.hex)?.scaled(request.brightness);
    context.lamp.set_colour(colour)?;
    ok(json!({ "hex": colour.to_hex(), "brightness": request.brightness }))
}

pub async fn scene(State(context): State<AppContext>, body: Result<Json<SceneRequest>, JsonRejection>) -> ApiResult {
    let Json(request) = body?;
    context.lamp.set_scene(&request.data)?;
    ok(json!({ "scene": request.data }))
}

/// Writes arbitrary data points as one command, never merged with other updates.
pub async fn dps(State(context): State<AppContext>, body: Result<Json<DpsRequest>, JsonRejection>) -> ApiResult {
    let Json(request) = body?;
    let count = request.dps.len();
    context.lamp.send_command(CommandKind::Raw, Payload::Raw(request.dps), request.urgent)?;
    ok(json!({ "queued": count, "urgent": request.urgent }))
}

pub async fn connect(State(context): State<AppContext>) -> ApiResult {
    ok(json!(context.lamp.connect().await?))
}

pub async fn disconnect(State(context): State<AppContext>) -> ApiResult {
    ok(json!(context.lamp.disconnect().await?))
}

pub async fn check(State(context): State<AppContext>) -> ApiResult {
    ok(json!(context.lamp.check_connection().await?))
}

pub async fn reconnect(State(context): State<AppContext>) -> ApiResult {
    // Effects would refill the queue that a reconnect flushes
    context.effects.stop_all().await;
    ok(json!(context.lamp.reconnect().await?))
}

/// The body is optional, an empty one starts the effect with default parameters.
pub async fn start_effect(State(context): State<AppContext>, Path(kind): Path<String>, body: Bytes) -> ApiResult {
    let params: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))?
    };

    let effect = context.effects.build(&kind, &params)?;
    context.effects.start(effect).await;
    info!("🌐 Started effect '{}'", kind);
    ok(json!({ "effect": kind, "running": true }))
}

pub async fn stop_effect(State(context): State<AppContext>, Path(kind): Path<String>) -> ApiResult {
    let stopped = context.effects.stop(&kind).await;
    ok(json!({ "effect": kind, "running": false, "stopped": stopped }))
}

pub async fn stop_all_effects(State(context): State<AppContext>) -> ApiResult {
    let stopped = context.effects.stop_all().await;
    ok(json!({ "stopped": stopped }))
}

pub async fn effects_status(State(context): State<AppContext>) -> ApiResult {
    let active = context.effects.active().await;
    let running: Map<String, Value> = known_effects()
        .into_iter()
        .map(|kind| {
            let is_active = active == Some(kind.as_str());
            (kind, json!(is_active))
        })
        .collect();
    ok(json!({ "activeEffect": active, "running": running }))
}
