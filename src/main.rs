use daily_manager::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let settings = Settings::from_env()?;
    daily_manager::init_tracing(settings.log_dir.as_deref())?;
    daily_manager::serve(settings).await
}
