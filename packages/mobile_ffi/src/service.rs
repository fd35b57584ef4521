use std::sync::LazyLock;

use frpc_mobile_core::{ProcessWorker, ServiceContext, ServiceController, ShimSettings};
use tokio::runtime::Runtime;

use crate::runtime::build_runtime;

/// The one service instance behind the C ABI
pub struct MobileService {
    controller: ServiceController<ProcessWorker>,
    _runtime: Runtime,
}

static SERVICE: LazyLock<Result<MobileService, String>> = LazyLock::new(MobileService::create);

pub fn service() -> Result<&'static MobileService, &'static str> {
    SERVICE.as_ref().map_err(String::as_str)
}

impl MobileService {
    fn create() -> Result<Self, String> {
        let (settings, settings_error) = ShimSettings::from_env();

        let runtime = build_runtime().map_err(|error| format!("failed to build runtime: {}", error))?;
        let context = ServiceContext::from_settings(&settings);

        context.in_scope(|| {
            if let Some(error) = settings_error {
                tracing::warn!(%error, "failed to load settings, using defaults");
            }
            tracing::debug!(?settings, "service created");
        });

        Ok(MobileService {
            controller: ServiceController::new(
                context,
                ProcessWorker::from_settings(&settings),
                runtime.handle().clone(),
            ),
            _runtime: runtime,
        })
    }

    pub fn controller(&self) -> &ServiceController<ProcessWorker> {
        &self.controller
    }
}
