use crate::config::Config;
use crate::error::DbError;
use crate::generators::{PqGen, Step, Wait};
use crate::pq::PgConn;
use crate::Error;
use fallible_iterator::FallibleIterator;
use log::debug;
use postgres_protocol::authentication;
use postgres_protocol::authentication::sasl::{self, ScramSha256};
use postgres_protocol::message::backend::Message;
use postgres_protocol::message::frontend;
use std::mem;

enum State {
    Startup,
    Auth,
    SaslContinue(ScramSha256),
    SaslFinal(ScramSha256),
    Info,
    Done,
}

/// The startup phase of a connection: startup message, authentication and
/// the server information up to the first `ReadyForQuery`.
pub(crate) struct ConnectGen {
    state: State,
    user: String,
    password: Option<Vec<u8>>,
    params: Vec<(&'static str, String)>,
}

impl ConnectGen {
    pub(crate) fn new(config: &Config) -> Result<ConnectGen, Error> {
        let user = config
            .get_user()
            .ok_or_else(|| Error::config("user missing".into()))?
            .to_string();

        let mut params = vec![("client_encoding", "UTF8".to_string())];
        params.push(("user", user.clone()));
        if let Some(dbname) = config.get_dbname() {
            params.push(("database", dbname.to_string()));
        }
        if let Some(options) = config.get_options() {
            params.push(("options", options.to_string()));
        }
        if let Some(application_name) = config.get_application_name() {
            params.push(("application_name", application_name.to_string()));
        }

        Ok(ConnectGen {
            state: State::Startup,
            user,
            password: config.get_password().map(<[u8]>::to_vec),
            params,
        })
    }

    fn password(&self) -> Result<&[u8], Error> {
        self.password
            .as_deref()
            .ok_or_else(|| Error::config("password missing".into()))
    }

    fn startup(&self, conn: &mut PgConn) -> Result<(), Error> {
        let params = self.params.iter().map(|(k, v)| (*k, v.as_str()));
        frontend::startup_message(params, conn.write_buf()).map_err(Error::encode)
    }

    fn authenticate(&self, conn: &mut PgConn, msg: Message) -> Result<State, Error> {
        match msg {
            Message::AuthenticationOk => Ok(State::Info),
            Message::AuthenticationCleartextPassword => {
                let pass = self.password()?;
                frontend::password_message(pass, conn.write_buf()).map_err(Error::encode)?;
                Ok(State::Auth)
            }
            Message::AuthenticationMd5Password(body) => {
                let pass = self.password()?;
                let output = authentication::md5_hash(self.user.as_bytes(), pass, body.salt());
                frontend::password_message(output.as_bytes(), conn.write_buf())
                    .map_err(Error::encode)?;
                Ok(State::Auth)
            }
            Message::AuthenticationSasl(body) => {
                let pass = self.password()?;
                let mut has_scram = false;
                let mut mechanisms = body.mechanisms();
                while let Some(mechanism) = mechanisms.next().map_err(Error::parse)? {
                    if mechanism == sasl::SCRAM_SHA_256 {
                        has_scram = true;
                    }
                }
                if !has_scram {
                    return Err(Error::not_supported("unsupported SASL mechanism"));
                }

                // no TLS, so no channel binding
                let scram = ScramSha256::new(pass, sasl::ChannelBinding::unsupported());
                frontend::sasl_initial_response(sasl::SCRAM_SHA_256, scram.message(), conn.write_buf())
                    .map_err(Error::encode)?;
                Ok(State::SaslContinue(scram))
            }
            Message::AuthenticationKerberosV5
            | Message::AuthenticationScmCredential
            | Message::AuthenticationGss
            | Message::AuthenticationSspi => {
                Err(Error::not_supported("unsupported authentication method"))
            }
            msg => Err(unexpected(msg)),
        }
    }
}

fn unexpected(msg: Message) -> Error {
    match msg {
        Message::ErrorResponse(body) => Error::db_body(body),
        _ => Error::unexpected_message(),
    }
}

impl PqGen<PgConn> for ConnectGen {
    type Output = ();

    fn resume(&mut self, conn: &mut PgConn) -> Result<Step<()>, Error> {
        loop {
            if !conn.flush()? {
                return Ok(Step::Wait(Wait::RW));
            }

            match self.state {
                State::Startup => {
                    self.startup(conn)?;
                    self.state = State::Auth;
                    continue;
                }
                State::Done => return Ok(Step::Ready(())),
                _ => {}
            }

            let msg = match conn.read_message()? {
                Some(msg) => msg,
                None => return Ok(Step::Wait(Wait::R)),
            };

            // the server may send these at any time
            let msg = match msg {
                Message::ParameterStatus(body) => {
                    let name = body.name().map_err(Error::parse)?;
                    let value = body.value().map_err(Error::parse)?;
                    conn.set_parameter(name, value);
                    continue;
                }
                Message::NoticeResponse(body) => {
                    let notice = DbError::parse(&mut body.fields()).map_err(Error::parse)?;
                    debug!("notice during startup: {}", notice);
                    continue;
                }
                msg => msg,
            };

            self.state = match (mem::replace(&mut self.state, State::Done), msg) {
                (State::Auth, msg) => self.authenticate(conn, msg)?,
                (State::SaslContinue(mut scram), Message::AuthenticationSaslContinue(body)) => {
                    scram
                        .update(body.data())
                        .map_err(|e| Error::authentication(e.into()))?;
                    frontend::sasl_response(scram.message(), conn.write_buf())
                        .map_err(Error::encode)?;
                    State::SaslFinal(scram)
                }
                (State::SaslFinal(mut scram), Message::AuthenticationSaslFinal(body)) => {
                    scram
                        .finish(body.data())
                        .map_err(|e| Error::authentication(e.into()))?;
                    State::Auth
                }
                (State::Info, Message::BackendKeyData(body)) => {
                    conn.set_backend_key(body.process_id(), body.secret_key());
                    State::Info
                }
                (State::Info, Message::ReadyForQuery(body)) => {
                    conn.set_ready(body.status());
                    State::Done
                }
                (_, msg) => return Err(unexpected(msg)),
            };
        }
    }
}
