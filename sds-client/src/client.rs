//! High-level client API: the RPC operations of the JANUS server.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::ClientError;
use sds_protocol::{ComOperation, Operation, ParameterName, SdsRequest, SrvGuiOperation};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::task::JoinHandle;

/// The `PDClass::callOperation` name whose return value follows an inverted
/// convention: a script with a return value reports -1, which cannot be
/// fixed server-side for historical reasons.
const RUN_SCRIPT_OPERATION: &str = "PortalScript.runScript";

/// Log lines fetched from the server gui.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessages {
    /// Transient marker identifying the lines already retrieved; pass it to
    /// the next call. Starts out as -1.
    pub last_seen: i32,
    /// Log lines the server produced since `last_seen`.
    pub lines: Vec<String>,
}

/// A connected client for a JANUS server.
///
/// Connecting performs the handshake, stores the assigned client id and
/// spawns the background read loop. All operations share one connection and
/// run one at a time.
///
/// ```no_run
/// use sds_client::{janus_password, Client, ConnectionConfig};
///
/// # async fn example() -> Result<(), sds_client::ClientError> {
/// let config = ConnectionConfig::new("127.0.0.1", "my-tool");
/// let client = Client::connect(config).await?;
/// let user_id = client.change_user("duckburg.mickey", &janus_password("secret")).await?;
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    conn: Arc<Connection>,
    client_id: u32,
    read_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connects to the server, performs the handshake and spawns the read
    /// loop.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        let conn = Arc::new(Connection::new(config));
        let client_id = conn.connect().await?;

        let read_conn = conn.clone();
        let read_task = tokio::spawn(async move {
            if let Err(err) = read_conn.read_loop().await {
                tracing::debug!(%err, "read loop terminated");
            }
        });

        Ok(Self {
            conn,
            client_id,
            read_task: StdMutex::new(Some(read_task)),
        })
    }

    /// The id the server assigned to this client during the handshake.
    /// Useful to find this connection in the server's log files.
    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// The underlying connection, for callers that build their own messages.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Logs the given user in. The username is usually prefixed with the
    /// principal name and a dot (`duckburg.mickey`); the server then expects
    /// a [`change_principal`](Client::change_principal) as the next call.
    ///
    /// `password` is the opaque credential blob from
    /// [`janus_password`](crate::crypt::janus_password), or the empty
    /// string.
    pub async fn change_user(&self, username: &str, password: &str) -> Result<u32, ClientError> {
        let mut request = SdsRequest::with_operation(Operation::ChangeUser);
        request.add_parameter(ParameterName::User, username);
        request.add_parameter(ParameterName::Password, password);
        let response = self.conn.send(request).await?;

        let result = response.get_int(ParameterName::ReturnValue)? as i32;
        if result > 0 {
            // the server only hands out a numeric code; ask it for the
            // localized reason in a second round-trip
            let localized = self.error_message(result).await?;
            let reason = if localized.starts_with("Login-Name oder Passwort") {
                "username or password incorrect".to_string()
            } else {
                localized
            };
            return Err(ClientError::Login {
                code: result,
                reason,
            });
        }

        Ok(response.get_int(ParameterName::UserId)?)
    }

    /// Switches to the given principal (the client affiliation of the
    /// logged-in user).
    pub async fn change_principal(&self, principal: &str) -> Result<(), ClientError> {
        let mut request = SdsRequest::with_operation(Operation::ChangePrincipal);
        request.add_parameter(ParameterName::Principal, principal);
        let response = self.conn.send(request).await?;

        let result = response.get_int(ParameterName::ReturnValue)? as i32;
        if result != 0 {
            return Err(ClientError::Server {
                code: result,
                message: format!("unable to change principal to {principal}"),
            });
        }
        Ok(())
    }

    /// Sets the language for localized strings. A number that matches no
    /// language silently selects language 0.
    pub async fn set_language(&self, language: i32) -> Result<(), ClientError> {
        let mut request = SdsRequest::with_operation(Operation::SetLanguage);
        request.add_parameter(ParameterName::Language, language);
        let response = self.conn.send(request).await?;

        // the server acknowledges with a bare message head
        if !response.is_empty() {
            return Err(ClientError::Server {
                code: 0,
                message: "set language failed, server sent an unexpected response".to_string(),
            });
        }
        Ok(())
    }

    /// Executes the given script source on the server and returns its
    /// output. `script_url` identifies the script in server logs, e.g. a
    /// filename.
    pub async fn run_script_on_server(
        &self,
        source_code: &str,
        script_url: Option<&str>,
    ) -> Result<String, ClientError> {
        let mut request = SdsRequest::with_operation(Operation::ComOperation);
        request.add_parameter(ParameterName::Index, ComOperation::RunScriptOnServer as u32);
        request.add_parameter(ParameterName::Parameter, source_code);
        if let Some(url) = script_url {
            request.add_parameter(ParameterName::Filename, url);
        }
        let response = self.conn.send(request).await?;

        if !response.get_bool(ParameterName::ReturnValue)? {
            return Err(ClientError::Server {
                code: 0,
                message: "unable to execute script on server".to_string(),
            });
        }
        Ok(response.get_string(ParameterName::Parameter)?.to_string())
    }

    /// Calls `PDClass::callOperation` with the given class and operation
    /// name (e.g. `"PortalScript.uploadScript"`) and returns the result
    /// list.
    pub async fn call_class_operation(
        &self,
        class_and_op: &str,
        parameters: &[String],
        parameters_pdo: &[String],
    ) -> Result<Vec<String>, ClientError> {
        let mut request = SdsRequest::with_operation(Operation::CallClassOperation);
        request.add_parameter(ParameterName::ClassAndOp, class_and_op);
        if !parameters.is_empty() {
            request.add_parameter(ParameterName::Parameter, parameters);
        }
        if !parameters_pdo.is_empty() {
            request.add_parameter(ParameterName::ParameterPdo, parameters_pdo);
        }
        let response = self.conn.send(request).await?;

        let result = response.get_int(ParameterName::ReturnValue)? as i32;
        if class_and_op == RUN_SCRIPT_OPERATION || result >= 0 {
            return Ok(response.get_string_list(ParameterName::Parameter)?.to_vec());
        }

        let returned = response.get_string_list(ParameterName::Parameter)?;
        let message = returned
            .first()
            .filter(|message| !message.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("operation {class_and_op} failed on server"));
        Err(ClientError::Server {
            code: result,
            message,
        })
    }

    /// Fetches the human-readable string (probably German) for an error
    /// code from a previous call.
    pub async fn error_message(&self, error_code: i32) -> Result<String, ClientError> {
        let mut request = SdsRequest::with_operation(Operation::ComOperation);
        request.add_parameter(ParameterName::Index, ComOperation::ErrorMessage as u32);
        request.add_parameter(ParameterName::Value, error_code);
        let response = self.conn.send(request).await?;

        Ok(response.get_string(ParameterName::ReturnValue)?.to_string())
    }

    /// Fetches the server log lines produced since `last_seen`. Pass -1 on
    /// the first call, then the returned marker.
    pub async fn get_log_messages(&self, last_seen: i32) -> Result<LogMessages, ClientError> {
        let mut request = SdsRequest::with_operation(Operation::SrvGui);
        request.add_parameter(ParameterName::Opcode, SrvGuiOperation::GetMessages as u32);
        request.add_parameter(ParameterName::Something, last_seen);
        request.add_parameter(ParameterName::Conversion, true);
        let response = self.conn.send(request).await?;

        if !response.get_bool(ParameterName::Conversion)? {
            return Err(ClientError::Server {
                code: 0,
                message: "server did not convert log messages to UTF-8".to_string(),
            });
        }

        let content = response.get_string(ParameterName::ReturnValue)?;
        let lines = if content.is_empty() {
            Vec::new()
        } else {
            content.trim().lines().map(str::to_string).collect()
        };
        Ok(LogMessages {
            last_seen: response.get_int(ParameterName::Last)? as i32,
            lines,
        })
    }

    /// Disconnects in an orderly fashion: tells the server this client is
    /// going away (the server sends no response), half-closes the socket
    /// and waits for the server to close its side.
    pub async fn disconnect(self) -> Result<(), ClientError> {
        let request = SdsRequest::with_operation(Operation::DisconnectClient);
        self.conn.send_no_response(request).await?;
        self.conn.shutdown_writer().await?;

        let task = self.read_task.lock().expect("read task lock").take();
        if let Some(task) = task {
            let _ = task.await;
        }

        self.conn.close().await;
        Ok(())
    }
}
