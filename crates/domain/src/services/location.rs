//! Location provider abstraction.

use std::sync::Mutex;

use crate::errors::LocationError;
use crate::models::LocationSample;

/// Source of position fixes for the timer-driven polling path.
#[async_trait::async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> Result<LocationSample, LocationError>;

    /// Called with every fix delivered through the push path.
    fn remember(&self, _sample: &LocationSample) {}
}

/// Mock provider for testing: returns whatever was last set.
#[derive(Debug, Default)]
pub struct MockLocationProvider {
    state: Mutex<Option<Result<LocationSample, LocationError>>>,
}

impl MockLocationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sample(&self, sample: LocationSample) {
        if let Ok(mut state) = self.state.lock() {
            *state = Some(Ok(sample));
        }
    }

    pub fn set_error(&self, error: LocationError) {
        if let Ok(mut state) = self.state.lock() {
            *state = Some(Err(error));
        }
    }
}

#[async_trait::async_trait]
impl LocationProvider for MockLocationProvider {
    async fn current_location(&self) -> Result<LocationSample, LocationError> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.clone())
            .unwrap_or(Err(LocationError::Unavailable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_mock_provider() {
        let provider = MockLocationProvider::new();
        assert_eq!(
            provider.current_location().await,
            Err(LocationError::Unavailable)
        );

        let sample = LocationSample::new(1.0, 2.0, 3.0, Utc::now());
        provider.set_sample(sample.clone());
        assert_eq!(provider.current_location().await, Ok(sample));

        provider.set_error(LocationError::PermissionDenied);
        assert_eq!(
            provider.current_location().await,
            Err(LocationError::PermissionDenied)
        );
    }
}
