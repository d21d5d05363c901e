//! Client stream request as received by the service

use crate::binding::Parcel;
use crate::error::Result;
use crate::stream::parameters::StreamParameters;

/// Identity of the process that asked for a stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioClient {
    pub pid: i32,
    pub uid: i32,
    pub package: String,
}

impl AudioClient {
    pub fn new(pid: i32, uid: i32, package: impl Into<String>) -> Self {
        Self {
            pid,
            uid,
            package: package.into(),
        }
    }
}

/// A request to open a stream
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    parameters: StreamParameters,
    client: AudioClient,
    sharing_mode_match_required: bool,
}

impl StreamRequest {
    pub fn new(parameters: StreamParameters, client: AudioClient) -> Self {
        Self {
            parameters,
            client,
            sharing_mode_match_required: false,
        }
    }

    pub fn parameters(&self) -> &StreamParameters {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut StreamParameters {
        &mut self.parameters
    }

    pub fn client(&self) -> &AudioClient {
        &self.client
    }

    /// When set, the service must not fall back to another sharing mode
    pub fn sharing_mode_match_required(&self) -> bool {
        self.sharing_mode_match_required
    }

    pub fn set_sharing_mode_match_required(&mut self, required: bool) {
        self.sharing_mode_match_required = required;
    }

    pub fn write_to_parcel(&self, parcel: &mut Parcel) {
        self.parameters.write_to_parcel(parcel);
        parcel.write_i32(self.client.pid);
        parcel.write_i32(self.client.uid);
        parcel.write_bool(self.sharing_mode_match_required);
    }

    /// The package name is not carried on the wire
    pub fn read_from_parcel(parcel: &mut Parcel) -> Result<Self> {
        let parameters = StreamParameters::read_from_parcel(parcel)?;
        let pid = parcel.read_i32()?;
        let uid = parcel.read_i32()?;
        let sharing_mode_match_required = parcel.read_bool()?;
        Ok(Self {
            parameters,
            client: AudioClient::new(pid, uid, String::new()),
            sharing_mode_match_required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Direction;

    #[test]
    fn test_request_over_parcel() {
        let mut params = StreamParameters::new();
        params.set_device_id(3).set_direction(Direction::INPUT).set_sample_rate(48000);
        let mut request = StreamRequest::new(params, AudioClient::new(12, 1000, "recorder"));
        request.set_sharing_mode_match_required(true);

        let mut parcel = Parcel::new();
        request.write_to_parcel(&mut parcel);
        let received = StreamRequest::read_from_parcel(&mut parcel).unwrap();

        assert_eq!(received.parameters().device_id(), 3);
        assert_eq!(received.parameters().direction(), Direction::INPUT);
        assert_eq!(received.parameters().sample_rate(), 48000);
        assert_eq!(received.client().pid, 12);
        assert_eq!(received.client().uid, 1000);
        assert!(received.client().package.is_empty());
        assert!(received.sharing_mode_match_required());
    }

    #[test]
    fn test_truncated_request() {
        let mut parcel = Parcel::new();
        StreamParameters::new().write_to_parcel(&mut parcel);
        assert!(StreamRequest::read_from_parcel(&mut parcel).is_err());
    }
}
