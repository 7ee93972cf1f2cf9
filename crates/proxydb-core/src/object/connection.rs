use serde_json::Value;

use super::{Mutation, Synchronized};
use crate::schema::CONNECTION;
use crate::types::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_USER, ObjectId};

/// Parameters handed to a connector when (re)connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

/// A database connection. `connected` is derived by the server and can only
/// change through crate-internal logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    id: ObjectId,
    host: String,
    port: u16,
    user: String,
    password: String,
    connected: bool,
}

impl Connection {
    pub fn new(id: impl Into<ObjectId>) -> Self {
        Self {
            id: id.into(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: String::new(),
            connected: false,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn set_host(&mut self, host: &str) -> Mutation {
        let host = host.trim();
        if self.host == host {
            return Mutation::unchanged();
        }
        self.host = host.to_string();
        Mutation::changed("host")
    }

    /// Floors to an integer; NaN, infinities and values outside the port
    /// range are rejected and the last good port is kept.
    pub fn set_port(&mut self, port: f64) -> Mutation {
        if !port.is_finite() {
            return Mutation::rejected();
        }
        let port = port.floor();
        if !(0.0..=f64::from(u16::MAX)).contains(&port) {
            return Mutation::rejected();
        }
        let port = port as u16;
        if self.port == port {
            return Mutation::unchanged();
        }
        self.port = port;
        Mutation::changed("port")
    }

    pub fn set_user(&mut self, user: &str) -> Mutation {
        if self.user == user {
            return Mutation::unchanged();
        }
        self.user = user.to_string();
        Mutation::changed("user")
    }

    pub fn set_password(&mut self, password: &str) -> Mutation {
        if self.password == password {
            return Mutation::unchanged();
        }
        self.password = password.to_string();
        Mutation::changed("password")
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    pub(crate) fn set_connected(&mut self, connected: bool) -> Mutation {
        if self.connected == connected {
            return Mutation::unchanged();
        }
        self.connected = connected;
        Mutation::changed("connected")
    }

    pub(crate) fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

impl Synchronized for Connection {
    const TYPE_NAME: &'static str = CONNECTION;

    fn id(&self) -> &ObjectId {
        &self.id
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "host" => Some(Value::from(self.host.as_str())),
            "port" => Some(Value::from(self.port)),
            "user" => Some(Value::from(self.user.as_str())),
            "password" => Some(Value::from(self.password.as_str())),
            "connected" => Some(Value::Bool(self.connected)),
            _ => None,
        }
    }

    fn write_field(&mut self, name: &str, value: &Value) -> Mutation {
        match (name, value) {
            ("host", Value::String(s)) => self.set_host(s),
            ("port", Value::Number(n)) => match n.as_f64() {
                Some(port) => self.set_port(port),
                None => Mutation::rejected(),
            },
            ("user", Value::String(s)) => self.set_user(s),
            ("password", Value::String(s)) => self.set_password(s),
            _ => Mutation::rejected(),
        }
    }
}
