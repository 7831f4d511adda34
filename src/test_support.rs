//! Scripted transport and canned switch replies for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;

use crate::error::TransportError;
use crate::transport::{ApiRequest, RawResponse, Transport};

pub(crate) const TOKEN: &str = "8c523ad44e0a8f46324aa71f371963e07211b04b7239519a6f60f1ee5939dcc0b1db6b49394ff6866a67c45a396993f9a21359c3abe595821f579cfd25fafeeb";

pub(crate) const LOGIN_BODY: &str = r#"{
	"login":	{
		"token":	"8c523ad44e0a8f46324aa71f371963e07211b04b7239519a6f60f1ee5939dcc0b1db6b49394ff6866a67c45a396993f9a21359c3abe595821f579cfd25fafeeb",
		"expire":	"86400"
	},
	"resp":	{
		"status":	"success",
		"respCode":	0,
		"respMsg":	"Operation success"
	}
}"#;

pub(crate) const LOGOUT_BODY: &str =
    r#"{"logout":{},"resp":{"status":"success","respCode":0,"respMsg":"Operation success"}}"#;

pub(crate) const UNAUTHORIZED_BODY: &str =
    r#"{"resp":{"status":"failure","respCode":1,"respMsg":"Invalid token"}}"#;

/// Login reply carrying `token`.
pub(crate) fn login_body(token: &str) -> String {
    format!(
        r#"{{"login":{{"token":"{}","expire":"86400"}},"resp":{{"status":"success","respCode":0,"respMsg":"Operation success"}}}}"#,
        token
    )
}

/// Documented sample reply of `GET /api/v1/device_info`.
pub(crate) const DEVICE_INFO_BODY: &str = r#"{
	"deviceInfo":	{
		"serialNumber":	"53L69C5FF001D",
		"macAddr":	"BC:A5:11:A0:7E:1D",
		"model":	"M4300-52G-PoE+",
		"swVer":	"12.0.19.6",
		"numOfPorts":	52,
		"numOfActivePorts":	1,
		"memoryUsage":	"90.58%",
		"cpuUsage":	"17.53%",
		"fanState":	[{
				"FAN-1":	"Operational",
				"FAN-2":	"Operational",
				"FAN-3":	"Operational",
				"FAN-4":	"Operational"
			}],
		"poeState":	true,
		"upTime":	"00 Days 01 Hrs 07 Mins 11 Secs",
		"temperatureSensors":	[{
				"sensorNum":	1,
				"sensorDesc":	"MAC-A",
				"sensorTemp":	23,
				"sensorState":	1
			}, {
				"sensorNum":	2,
				"sensorDesc":	"MAC-B",
				"sensorTemp":	31,
				"sensorState":	1
			}],
		"bootVersion":	"B1.0.0.17",
		"rxData":	9269183,
		"txData":	2814740
	},
	"resp":	{
		"status":	"success",
		"respCode":	0,
		"respMsg":	"Operation success"
	}
}"#;

enum Step {
    Reply(Result<RawResponse, TransportError>),
    Hang,
}

/// Transport that answers from a script, in order, and records every request.
///
/// Requests to `/login` are answered by the login responder when one is set,
/// and requests bearing the rejected token get a 401; neither consumes the
/// script. Every send yields once so concurrent callers interleave.
#[derive(Default)]
pub(crate) struct MockTransport {
    script: Mutex<VecDeque<Step>>,
    login: Mutex<Option<RawResponse>>,
    rejected: Mutex<Option<String>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(self, status: u16, body: impl Into<String>) -> Self {
        self.push(Step::Reply(Ok(raw(status, body))));
        self
    }

    pub(crate) fn reply_retry_after(self, status: u16, body: &str, secs: u64) -> Self {
        let mut response = raw(status, body);
        response
            .headers
            .insert(RETRY_AFTER, HeaderValue::from(secs));
        self.push(Step::Reply(Ok(response)));
        self
    }

    pub(crate) fn fail(self, error: TransportError) -> Self {
        self.push(Step::Reply(Err(error)));
        self
    }

    pub(crate) fn hang(self) -> Self {
        self.push(Step::Hang);
        self
    }

    pub(crate) fn with_login(self, body: impl Into<String>) -> Self {
        *self.login.lock().unwrap() = Some(raw(200, body));
        self
    }

    pub(crate) fn reject_token(self, token: &str) -> Self {
        *self.rejected.lock().unwrap() = Some(token.to_string());
        self
    }

    fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, endpoint: &str) -> usize {
        let suffix = format!("/api/v1/{}", endpoint);
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.ends_with(&suffix))
            .count()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

fn raw(status: u16, body: impl Into<String>) -> RawResponse {
    RawResponse::new(StatusCode::from_u16(status).unwrap(), body)
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<RawResponse, TransportError> {
        let is_login = request.url.ends_with("/api/v1/login");
        let is_rejected = match (request.bearer_token(), self.rejected.lock().unwrap().as_deref()) {
            (Some(sent), Some(rejected)) => sent == rejected,
            _ => false,
        };
        self.requests.lock().unwrap().push(request);
        tokio::task::yield_now().await;

        if is_rejected {
            return Ok(raw(401, UNAUTHORIZED_BODY));
        }
        if is_login {
            if let Some(reply) = self.login.lock().unwrap().clone() {
                return Ok(reply);
            }
        }

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(result)) => result,
            Some(Step::Hang) => std::future::pending().await,
            None => Err(TransportError::Other("no scripted reply left".into())),
        }
    }
}
