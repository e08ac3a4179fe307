use slotdrop::{app, init_tracing, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let state = AppState::init().await?;
    let config = state.config.clone();
    let app = app::build_app(state)?;
    app::serve(app, &config).await
}
