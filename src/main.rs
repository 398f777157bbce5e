// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use mimalloc::MiMalloc;
use modules::{
    common::signal::{SignalManager, SIGNAL_MANAGER},
    context::Initialize,
    database::manager::DatabaseManager,
    error::MailSyncResult,
    imap::remote::ImapConnector,
    logger,
    processor::{handler::StoreHandler, MessageProcessor, ProcessorConfig},
    settings::dir::DataDirManager,
    sync::manager::SyncProcessManager,
    utils::tls::MailSyncTls,
};
use std::sync::Arc;
use tracing::info;

mod modules;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> MailSyncResult<()> {
    logger::initialize_logging();
    info!("Starting mailsync");
    info!("Version:  {}", mailsync_version!());

    if let Err(error) = initialize().await {
        eprintln!("{:?}", error);
        return Err(error);
    }

    let databases = Arc::new(DatabaseManager::open()?);
    let processor = MessageProcessor::start(
        StoreHandler::new(databases.clone()),
        ProcessorConfig::from_settings(),
    );
    let manager = SyncProcessManager::new(databases, processor, ImapConnector);
    manager.start_all().await?;

    let mut shutdown = SIGNAL_MANAGER.subscribe();
    let _ = shutdown.recv().await;
    manager.shutdown_all().await;
    info!("mailsync stopped");
    Ok(())
}

async fn initialize() -> MailSyncResult<()> {
    SignalManager::initialize().await?;
    DataDirManager::initialize().await?;
    MailSyncTls::initialize().await?;
    Ok(())
}
