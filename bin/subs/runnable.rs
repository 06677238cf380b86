use anyhow::Result;

#[async_trait::async_trait]
pub trait RunnableSubcommand: Send + Sync {
    async fn run(&self) -> Result<()>;
}
