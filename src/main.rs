// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;
use std::sync::Arc;

use bunq_session_client::config::{
    env_optional, env_or_default, env_required, API_KEY_ENV, DATA_DIR_ENV, DEFAULT_DATA_DIR,
    LOG_FORMAT_ENV,
};
use bunq_session_client::keys::FileKeyStore;
use bunq_session_client::storage::{FileStorage, StorageError};
use bunq_session_client::transport::ReqwestTransport;
use bunq_session_client::{
    ApiCredential, ApiRequest, BankApiClient, BunqConfig, BunqResult, SessionContext,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const CONTEXT_NAME: &str = "default";

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match env_optional(LOG_FORMAT_ENV).as_deref() {
        Some("json") => builder.json().init(),
        _ => builder.init(),
    }
}

async fn run() -> BunqResult<()> {
    let config = BunqConfig::from_env()?;
    let credential = ApiCredential::new(env_required(API_KEY_ENV)?);
    let storage = FileStorage::new(env_or_default(DATA_DIR_ENV, DEFAULT_DATA_DIR));
    info!(
        environment = ?config.environment,
        base_url = %config.base_url,
        data_dir = %storage.root().display(),
        "Starting bunq session client"
    );

    let transport = Arc::new(ReqwestTransport::new(config.timeout)?);
    let key_store = Arc::new(FileKeyStore::new(storage.clone()));
    let client = BankApiClient::new(config, transport, key_store, credential);

    let context_path = storage.context_path(CONTEXT_NAME)?;
    match storage.read_json::<SessionContext>(&context_path) {
        Ok(context) => {
            let state = client.session().restore(context).await?;
            info!(state = %state, "Resumed saved session context");
        }
        Err(StorageError::NotFound(_)) => info!("No saved session context; bootstrapping"),
        Err(e) => return Err(e.into()),
    }

    let response = client.execute(ApiRequest::get("/user")).await?;
    info!(
        status = %response.status,
        response_id = ?response.response_id,
        state = %client.session().state(),
        "Fetched user"
    );

    if let Some(context) = client.session().snapshot() {
        storage.write_json(&context_path, &context)?;
        info!(path = %context_path.display(), "Saved session context");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = e.error_code(), error = %e, "bunq session client failed");
            ExitCode::FAILURE
        }
    }
}
