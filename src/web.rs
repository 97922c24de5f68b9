use crate::{
    Ambiguity, AmbiguityResolver, BoardError, DisplayNames, GenerationError, HostGate, Question,
    QuestionGenerator, Role, SharedQuestionBoard, StatLine, StatQuestion, artwork_url,
};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info};

type SharedState = Arc<AppState>;

pub const HOST_SECRET_HEADER: &str = "x-host-secret";
const SUGGESTION_LIMIT: usize = 5;

pub struct AppState {
    pub generator: Arc<QuestionGenerator>,
    pub board: SharedQuestionBoard,
    pub gate: HostGate,
}

impl AppState {
    pub fn new(generator: QuestionGenerator, gate: HostGate) -> Self {
        Self {
            generator: Arc::new(generator),
            board: SharedQuestionBoard::new(),
            gate,
        }
    }

    fn role(&self, headers: &HeaderMap) -> Role {
        let attempt = headers
            .get(HOST_SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        self.gate.authorize(attempt)
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    /// Shared secret for the host role; `None` disables hosting.
    pub host_secret: Option<String>,
    pub permissive_cors: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            host_secret: None,
            permissive_cors: true,
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

pub async fn serve(config: WebConfig, generator: QuestionGenerator) -> Result<(), WebError> {
    let gate = HostGate::new(config.host_secret.clone());
    info!(
        %config.addr,
        hosting = gate.is_enabled(),
        usage = generator.usage().len(),
        corpus = generator.corpus().len(),
        "Binding HTTP listener"
    );
    let state = Arc::new(AppState::new(generator, gate));
    let router = build_router(state, config.permissive_cors);
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(value: GenerationError) -> Self {
        let status = match value {
            GenerationError::NoUsageData => StatusCode::SERVICE_UNAVAILABLE,
            GenerationError::Exhausted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: value.to_string(),
        }
    }
}

impl From<BoardError> for ApiError {
    fn from(value: BoardError) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

fn build_router(state: SharedState, permissive_cors: bool) -> Router {
    let router = Router::new()
        .route("/healthz", get(health))
        .route("/api/board", get(api_board))
        .route("/api/moves/current", get(api_moves_current))
        .route("/api/moves/next", post(api_moves_next))
        .route("/api/moves/check", post(api_moves_check))
        .route("/api/stats/current", get(api_stats_current))
        .route("/api/stats/next", post(api_stats_next))
        .route("/api/corpus", get(api_corpus))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false))
                .on_response(DefaultOnResponse::new().include_headers(false)),
        )
        .layer(CompressionLayer::new());
    if permissive_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[derive(Debug, Default, Deserialize)]
struct RevealParams {
    #[serde(default)]
    reveal: bool,
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    answer: String,
    moves: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CorpusParams {
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnswerView {
    key: String,
    names: DisplayNames,
    id: u32,
    source: String,
    rank: usize,
    artwork: String,
}

#[derive(Debug, Serialize)]
struct MoveQuestionView {
    moves: Vec<String>,
    display: Vec<DisplayNames>,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<AnswerView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ambiguity: Option<Ambiguity>,
    /// False for a private self-serve question.
    published: bool,
}

impl MoveQuestionView {
    fn build(
        question: &Question,
        reveal: bool,
        published: bool,
        generator: &QuestionGenerator,
    ) -> Self {
        let (answer, ambiguity) = if reveal {
            let verdict = AmbiguityResolver::new(generator.corpus()).check(question);
            (
                Some(AnswerView {
                    key: question.answer_key.clone(),
                    names: question.answer_names.clone(),
                    id: question.answer_id,
                    source: question.source.clone(),
                    rank: question.rank,
                    artwork: artwork_url(question.answer_id),
                }),
                Some(verdict),
            )
        } else {
            (None, None)
        };
        Self {
            moves: question.clue_moves.clone(),
            display: question.clue_names.clone(),
            answer,
            ambiguity,
            published,
        }
    }
}

#[derive(Debug, Serialize)]
struct StatQuestionView {
    stats: StatLine,
    total: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<AnswerView>,
    published: bool,
}

impl StatQuestionView {
    fn build(question: &StatQuestion, reveal: bool, published: bool) -> Self {
        Self {
            stats: question.stats,
            total: question.stats.total(),
            answer: reveal.then(|| AnswerView {
                key: question.answer_key.clone(),
                names: question.answer_names.clone(),
                id: question.answer_id,
                source: question.source.clone(),
                rank: question.rank,
                artwork: artwork_url(question.answer_id),
            }),
            published,
        }
    }
}

#[derive(Debug, Serialize)]
struct BoardView {
    role: String,
    revision: u64,
    last_update: Option<u64>,
    moves: Option<MoveQuestionView>,
    stats: Option<StatQuestionView>,
}

#[derive(Debug, Serialize)]
struct CorpusEntryView {
    key: String,
    id: Option<u32>,
    names: DisplayNames,
    stats: Option<StatLine>,
    moves: Vec<String>,
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "movequiz-web",
        "usage": state.generator.usage().len(),
        "corpus": state.generator.corpus().len(),
    }))
}

async fn api_board(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<RevealParams>,
) -> Json<BoardView> {
    let role = state.role(&headers);
    let reveal = role.is_host() || params.reveal;
    let snapshot = state.board.snapshot();
    Json(BoardView {
        role: role_label(role).to_string(),
        revision: snapshot.revision,
        last_update: snapshot.last_update,
        moves: snapshot
            .move_question
            .as_deref()
            .map(|q| MoveQuestionView::build(q, reveal, true, &state.generator)),
        stats: snapshot
            .stat_question
            .as_deref()
            .map(|q| StatQuestionView::build(q, reveal, true)),
    })
}

async fn api_moves_current(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<RevealParams>,
) -> Result<Json<MoveQuestionView>, ApiError> {
    let reveal = state.role(&headers).is_host() || params.reveal;
    let question = state
        .board
        .current_move()
        .ok_or_else(|| ApiError::not_found("no move question has been published"))?;
    Ok(Json(MoveQuestionView::build(
        &question,
        reveal,
        true,
        &state.generator,
    )))
}

async fn api_moves_next(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<RevealParams>,
) -> Result<Json<MoveQuestionView>, ApiError> {
    let role = state.role(&headers);
    let generator = Arc::clone(&state.generator);
    let question = tokio::task::spawn_blocking(move || {
        let mut rng = StdRng::from_entropy();
        generator.generate(&mut rng)
    })
    .await
    .map_err(|err| {
        error!(error = %err, "generation task failed");
        ApiError::internal("generation task failed")
    })??;

    let reveal = role.is_host() || params.reveal;
    if role.is_host() {
        let published = state.board.publish_move(role, question)?;
        return Ok(Json(MoveQuestionView::build(
            &published,
            reveal,
            true,
            &state.generator,
        )));
    }
    Ok(Json(MoveQuestionView::build(
        &question,
        reveal,
        false,
        &state.generator,
    )))
}

async fn api_moves_check(
    State(state): State<SharedState>,
    Json(request): Json<CheckRequest>,
) -> Result<Json<Ambiguity>, ApiError> {
    if request.answer.trim().is_empty() {
        return Err(ApiError::bad_request("answer must not be empty"));
    }
    if request.moves.iter().all(|name| name.trim().is_empty()) {
        return Err(ApiError::bad_request("at least one move is required"));
    }
    let verdict = AmbiguityResolver::new(state.generator.corpus())
        .check_moves(&request.moves, &request.answer);
    Ok(Json(verdict))
}

async fn api_stats_current(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<RevealParams>,
) -> Result<Json<StatQuestionView>, ApiError> {
    let reveal = state.role(&headers).is_host() || params.reveal;
    let question = state
        .board
        .current_stat()
        .ok_or_else(|| ApiError::not_found("no stat question has been published"))?;
    Ok(Json(StatQuestionView::build(&question, reveal, true)))
}

async fn api_stats_next(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<RevealParams>,
) -> Result<Json<StatQuestionView>, ApiError> {
    let role = state.role(&headers);
    let generator = Arc::clone(&state.generator);
    let question = tokio::task::spawn_blocking(move || {
        let mut rng = StdRng::from_entropy();
        generator.generate_stat_question(&mut rng)
    })
    .await
    .map_err(|err| {
        error!(error = %err, "generation task failed");
        ApiError::internal("generation task failed")
    })??;

    let reveal = role.is_host() || params.reveal;
    if role.is_host() {
        let published = state.board.publish_stat(role, question)?;
        return Ok(Json(StatQuestionView::build(&published, reveal, true)));
    }
    Ok(Json(StatQuestionView::build(&question, reveal, false)))
}

async fn api_corpus(
    State(state): State<SharedState>,
    Query(params): Query<CorpusParams>,
) -> Result<Json<CorpusEntryView>, ApiError> {
    let name = params
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing `name` parameter"))?;
    let corpus = state.generator.corpus();
    match corpus.resolve(name) {
        Some(entry) => Ok(Json(CorpusEntryView {
            key: entry.key().to_string(),
            id: entry.id(),
            names: entry.display_names(),
            stats: entry.stats().copied(),
            moves: entry.moves().to_vec(),
        })),
        None => {
            let hint = corpus
                .suggest(name, SUGGESTION_LIMIT)
                .into_iter()
                .map(|(key, _)| key)
                .collect::<Vec<_>>()
                .join(", ");
            if hint.is_empty() {
                Err(ApiError::not_found(format!("no entry for {name}")))
            } else {
                Err(ApiError::not_found(format!(
                    "no entry for {name}; did you mean: {hint}"
                )))
            }
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Host => "host",
        Role::Player => "player",
    }
}
