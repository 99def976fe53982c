/*!
    Boundary server: reads request frames, runs them against the app and
    writes back one response frame per request.

    Sessions belong to the connection that opened them and are closed when
    that connection goes away.
*/

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixListener;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use signer_core::wire::{Request, RequestOp, Response, WireError, read_frame, write_frame};
use signer_core::{ErrorOrigin, TeeError, no_params};

use crate::app::TrustedApp;
use crate::session::Session;

/**
    Serve one connection until the peer hangs up.

    Malformed requests are answered with an error response; a framing error
    ends the connection.
*/
pub fn serve_connection<S: Read + Write>(app: &TrustedApp, mut stream: S) -> Result<(), WireError> {
    let mut sessions: HashMap<u32, Session> = HashMap::new();

    while let Some(body) = read_frame(&mut stream)? {
        let response = match Request::decode(&body) {
            Ok(request) => handle_request(app, &mut sessions, request),
            Err(e) => {
                warn!("rejecting malformed request: {e}");
                Response::failure(e.to_tee_error(), ErrorOrigin::Comms, 0)
            }
        };
        write_frame(&mut stream, &response.encode())?;
    }

    if !sessions.is_empty() {
        debug!("peer left {} session(s) open, closing", sessions.len());
    }
    Ok(())
}

fn handle_request(
    app: &TrustedApp,
    sessions: &mut HashMap<u32, Session>,
    request: Request,
) -> Response {
    let id = request.session;

    match request.op {
        RequestOp::OpenSession => match app.open_session(request.param_types()) {
            Ok(session) => {
                let id = session.id();
                sessions.insert(id, session);
                Response::success(id, &request.params)
            }
            Err((error, origin)) => Response::failure(error, origin, 0),
        },

        RequestOp::InvokeCommand => {
            let Some(session) = sessions.get_mut(&id) else {
                warn!("invoke on unknown session {id}");
                return Response::failure(TeeError::BadState, ErrorOrigin::Tee, id);
            };

            let declared = request.param_types();
            let mut params = request.params;
            match session.invoke(request.command, declared, &mut params) {
                Ok(()) => Response::success(id, &params),
                Err(error) => Response::failure(error, ErrorOrigin::TrustedApp, id),
            }
        }

        RequestOp::CloseSession => match sessions.remove(&id) {
            Some(mut session) => {
                session.close();
                Response::success(id, &no_params())
            }
            None => {
                warn!("close of unknown session {id}");
                Response::failure(TeeError::BadState, ErrorOrigin::Tee, id)
            }
        },
    }
}

/**
    Accept connections forever, serving each on its own thread.
*/
pub fn serve_unix(app: Arc<TrustedApp>, listener: UnixListener) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr()
        && let Some(path) = addr.as_pathname()
    {
        info!("listening on {}", path.display());
    }

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };

        let app = Arc::clone(&app);
        thread::Builder::new()
            .name("signer-conn".into())
            .spawn(move || {
                debug!("client connected");
                match serve_connection(&app, stream) {
                    Ok(()) => debug!("client disconnected"),
                    Err(e) => warn!("connection closed: {e}"),
                }
            })?;
    }

    Ok(())
}
