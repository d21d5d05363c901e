//! Find-or-open registry of shared endpoints

use crate::device::ExclusiveStream;
use crate::error::{AAudioError, Result};
use crate::service::endpoint_shared::{EndpointConfig, SharedEndpoint};
use crate::service::stream_shared::SharedStream;
use crate::stream::StreamRequest;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Opens the exclusive stream backing a new endpoint
pub type DeviceFactory =
    Box<dyn Fn(&StreamRequest) -> Result<Arc<dyn ExclusiveStream>> + Send + Sync>;

struct Entry {
    endpoint: Arc<SharedEndpoint>,
    open_count: usize,
}

/// Hands out one shared endpoint per device and direction
pub struct EndpointManager {
    factory: DeviceFactory,
    config: EndpointConfig,
    entries: Mutex<Vec<Entry>>,
}

impl EndpointManager {
    pub fn new(config: EndpointConfig, factory: DeviceFactory) -> Self {
        Self {
            factory,
            config,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Existing endpoint for the request's device and direction, or a newly
    /// opened one. Each call takes a reference released by `close_endpoint`.
    pub fn open_endpoint(&self, request: &StreamRequest) -> Result<Arc<SharedEndpoint>> {
        let params = request.parameters();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.iter_mut().find(|e| {
            e.endpoint.is_connected() && e.endpoint.matches(params.device_id(), params.direction())
        }) {
            entry.open_count += 1;
            debug!(
                "Reusing endpoint {} ({} references)",
                entry.endpoint.device_id(),
                entry.open_count
            );
            return Ok(entry.endpoint.clone());
        }

        let device = (self.factory)(request)?;
        let endpoint = Arc::new(SharedEndpoint::open(device, request, &self.config)?);
        entries.push(Entry {
            endpoint: endpoint.clone(),
            open_count: 1,
        });
        info!(
            "Opened shared endpoint for device {} {}",
            endpoint.device_id(),
            endpoint.direction()
        );
        Ok(endpoint)
    }

    /// Drop one reference, closing the endpoint on the last
    pub fn close_endpoint(&self, endpoint: &Arc<SharedEndpoint>) -> Result<()> {
        let closing = {
            let mut entries = self.entries.lock();
            let index = entries
                .iter()
                .position(|e| Arc::ptr_eq(&e.endpoint, endpoint))
                .ok_or_else(|| AAudioError::invalid_state("endpoint not managed here"))?;
            entries[index].open_count -= 1;
            if entries[index].open_count == 0 {
                Some(entries.remove(index).endpoint)
            } else {
                None
            }
        };

        match closing {
            Some(endpoint) => {
                info!("Closing shared endpoint for device {}", endpoint.device_id());
                endpoint.close()
            }
            None => Ok(()),
        }
    }

    /// Open a client stream on the matching endpoint
    pub fn open_stream(&self, request: &StreamRequest) -> Result<Arc<SharedStream>> {
        let endpoint = self.open_endpoint(request)?;
        match SharedStream::open(endpoint.clone(), request) {
            Ok(stream) => Ok(stream),
            Err(e) => {
                warn!("Failed to open shared stream: {}", e);
                if let Err(close_error) = self.close_endpoint(&endpoint) {
                    warn!("Releasing endpoint failed: {}", close_error);
                }
                Err(e)
            }
        }
    }

    /// Close a client stream and release its endpoint reference.
    ///
    /// The reference goes back only once; closing a closed stream is
    /// `InvalidState` and leaves the endpoint alone.
    pub fn close_stream(&self, stream: &Arc<SharedStream>) -> Result<()> {
        if !stream.close() {
            return Err(AAudioError::invalid_state("stream already closed"));
        }
        self.close_endpoint(stream.endpoint())
    }

    pub fn endpoint_count(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SimulatedDeviceConfig, SimulatedStream};
    use crate::service::EndpointState;
    use crate::stream::{AudioClient, Direction, StreamParameters};

    fn manager() -> EndpointManager {
        EndpointManager::new(
            EndpointConfig::default(),
            Box::new(|request: &StreamRequest| {
                let device: Arc<dyn ExclusiveStream> =
                    Arc::new(SimulatedStream::new(SimulatedDeviceConfig {
                        device_id: request.parameters().device_id(),
                        ..Default::default()
                    }));
                Ok(device)
            }),
        )
    }

    fn request(device_id: i32, direction: Direction) -> StreamRequest {
        let mut params = StreamParameters::new();
        params.set_device_id(device_id).set_direction(direction);
        StreamRequest::new(params, AudioClient::new(7, 7, "manager"))
    }

    #[test]
    fn test_same_device_shares_endpoint() {
        let manager = manager();
        let a = manager.open_endpoint(&request(3, Direction::OUTPUT)).unwrap();
        let b = manager.open_endpoint(&request(3, Direction::OUTPUT)).unwrap();
        let c = manager.open_endpoint(&request(3, Direction::INPUT)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(manager.endpoint_count(), 2);

        manager.close_endpoint(&a).unwrap();
        assert_eq!(manager.endpoint_count(), 2);
        manager.close_endpoint(&b).unwrap();
        manager.close_endpoint(&c).unwrap();
        assert_eq!(manager.endpoint_count(), 0);
    }

    #[test]
    fn test_failed_stream_releases_endpoint() {
        let manager = manager();
        let mut bad = request(3, Direction::OUTPUT);
        bad.parameters_mut().set_samples_per_frame(6);
        assert!(manager.open_stream(&bad).is_err());
        assert_eq!(manager.endpoint_count(), 0);
    }

    #[test]
    fn test_stream_lifecycle() {
        let manager = manager();
        let stream = manager.open_stream(&request(3, Direction::OUTPUT)).unwrap();
        assert_eq!(stream.endpoint().registered_stream_count(), 1);
        stream.start().unwrap();
        manager.close_stream(&stream).unwrap();
        assert_eq!(manager.endpoint_count(), 0);
        assert_eq!(stream.endpoint().registered_stream_count(), 0);
    }

    #[test]
    fn test_closing_twice_keeps_other_clients_running() {
        let manager = manager();
        let a = manager.open_stream(&request(3, Direction::OUTPUT)).unwrap();
        let b = manager.open_stream(&request(3, Direction::OUTPUT)).unwrap();
        b.start().unwrap();

        manager.close_stream(&a).unwrap();
        assert!(matches!(
            manager.close_stream(&a),
            Err(AAudioError::InvalidState(_))
        ));
        assert_eq!(manager.endpoint_count(), 1);
        assert_eq!(b.endpoint().state(), EndpointState::Running);
        assert!(b.endpoint().is_callback_running());

        manager.close_stream(&b).unwrap();
        assert_eq!(manager.endpoint_count(), 0);
        assert_eq!(b.endpoint().state(), EndpointState::Closed);
    }
}
