//! Command dispatch: one decoded request in, one response out.
//!
//! Every command is a plain `(session, payload) -> Result<Response, _>`
//! function. `dispatch` picks the function by variant and turns session
//! errors into `failure` responses, so the connection loop never sees a
//! business error.

use parley_protocol::{Credentials, Response, ServerCommand};
use parley_session::{register, CredentialStore, Session, SessionError};

/// What the connection loop should do after a command.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Send this response, then keep reading.
    Reply(Response),
    /// The client asked to end the session.
    Close,
}

pub(crate) async fn dispatch<S: CredentialStore>(
    session: &mut Session,
    store: &S,
    command: ServerCommand,
) -> Outcome {
    let verb = command.verb();
    let result = match command {
        ServerCommand::Login(credentials) => {
            login(session, store, &credentials).await
        }
        ServerCommand::Register(credentials) => {
            register(store, &credentials).await.map(|()| Response::success())
        }
        ServerCommand::Advertise { credentials, port } => {
            advertise(session, store, &credentials, port).await
        }
        ServerCommand::Connect {
            credentials,
            target,
            port,
        } => connect(session, store, &credentials, &target, port).await,
        ServerCommand::Message {
            credentials,
            message,
            quit,
        } => relay(session, store, &credentials, &message, quit).await,
        ServerCommand::Close => return Outcome::Close,
    };

    Outcome::Reply(result.unwrap_or_else(|e| {
        tracing::debug!(
            verb,
            username = session.identity().unwrap_or("-"),
            error = %e,
            "command refused"
        );
        Response::failure(e.kind(), e.to_string())
    }))
}

async fn login<S: CredentialStore>(
    session: &mut Session,
    store: &S,
    credentials: &Credentials,
) -> Result<Response, SessionError> {
    session.login(store, credentials).await?;
    Ok(Response::success())
}

async fn advertise<S: CredentialStore>(
    session: &Session,
    store: &S,
    credentials: &Credentials,
    port: Option<u16>,
) -> Result<Response, SessionError> {
    session.authorize(store, credentials).await?;
    Ok(Response::users(session.advertise(port)?))
}

async fn connect<S: CredentialStore>(
    session: &Session,
    store: &S,
    credentials: &Credentials,
    target: &str,
    port: Option<u16>,
) -> Result<Response, SessionError> {
    session.authorize(store, credentials).await?;
    let rendezvous = session.connect(target, port).await?;
    Ok(Response::rendezvous(rendezvous))
}

async fn relay<S: CredentialStore>(
    session: &Session,
    store: &S,
    credentials: &Credentials,
    message: &str,
    quit: bool,
) -> Result<Response, SessionError> {
    session.authorize(store, credentials).await?;
    if quit {
        session.quit()?;
    } else {
        session.relay(message)?;
    }
    Ok(Response::success())
}
