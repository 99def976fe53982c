use tracing::{debug, error};

use signer_core::{Command, ParamTypes, Params, TeeError, TeeResult};

use crate::handlers;
use crate::session::Session;

/**
    Route a command id to its handler.
*/
pub(crate) fn invoke_command(
    session: &Session,
    command: u32,
    declared: ParamTypes,
    params: &mut Params,
) -> TeeResult<()> {
    let Some(command) = Command::from_u32(command) else {
        error!("session {}: unsupported command {command:#x}", session.id());
        return Err(TeeError::NotSupported);
    };

    debug!("session {}: {command} with {declared}", session.id());

    match command {
        Command::GetKey => handlers::get_public_key(session, declared, params),
        Command::Sign => handlers::sign(session, declared, params),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::tests::memory_instance;
    use signer_core::{Param, param_types_of};

    #[test]
    fn unknown_command_is_not_supported() {
        let instance = memory_instance();
        let mut session = instance.open_session(ParamTypes::NONE).unwrap();

        let mut params: Params = [Param::output(32), Param::output(32), Param::None, Param::None];
        let types = param_types_of(&params);
        let err = session.invoke(2, types, &mut params).unwrap_err();
        assert_eq!(err, TeeError::NotSupported);
        assert_eq!(params[0].as_output().unwrap().size(), 0);
    }

    #[test]
    fn known_ids_reach_their_handlers() {
        let instance = memory_instance();
        let mut session = instance.open_session(ParamTypes::NONE).unwrap();

        let mut params: Params = [Param::output(32), Param::output(32), Param::None, Param::None];
        let types = param_types_of(&params);
        session.invoke(0, types, &mut params).unwrap();

        let mut params: Params = [Param::input(b"m".to_vec()), Param::output(64), Param::None, Param::None];
        let types = param_types_of(&params);
        session.invoke(1, types, &mut params).unwrap();
    }
}
