/*!
    Interactive menu driving one session.

    Keys:
      1 - read the public key, print it and save the public key artifact
      2 - sign the configured message and save the signature artifact
      3 - print the saved public key as PEM and verify the saved artifacts
          against the configured message
      0 - exit

    Whitespace is skipped and unknown keys show the menu again. End of input
    exits.
    A failed boundary call ends the loop with an error; problems with the
    artifact files or verification are reported and the loop continues.
*/

use std::io::{self, Read, Write};
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, warn};

use crate::artifact::{PublicKeyArtifact, SignatureArtifact};
use crate::context::{InvokeError, Session};
use crate::verify::{sha256, verify};

/// Message signed and verified when none is configured.
pub const DEFAULT_MESSAGE: &str = "Noser Engineering";
pub const DEFAULT_PUBLIC_KEY_PATH: &str = "pubkey.bin";
pub const DEFAULT_SIGNATURE_PATH: &str = "signature.bin";

/**
    What the menu signs and where it keeps its artifacts.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    pub message: Vec<u8>,
    pub public_key_path: PathBuf,
    pub signature_path: PathBuf,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            message: DEFAULT_MESSAGE.as_bytes().to_vec(),
            public_key_path: PathBuf::from(DEFAULT_PUBLIC_KEY_PATH),
            signature_path: PathBuf::from(DEFAULT_SIGNATURE_PATH),
        }
    }
}

/**
    A menu entry.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuChoice {
    GetKey,
    Sign,
    Verify,
    Exit,
}

impl MenuChoice {
    pub const ALL: [Self; 4] = [Self::GetKey, Self::Sign, Self::Verify, Self::Exit];

    pub const fn from_key(key: u8) -> Option<Self> {
        match key {
            b'1' => Some(Self::GetKey),
            b'2' => Some(Self::Sign),
            b'3' => Some(Self::Verify),
            b'0' => Some(Self::Exit),
            _ => None,
        }
    }

    pub const fn key(self) -> char {
        match self {
            Self::GetKey => '1',
            Self::Sign => '2',
            Self::Verify => '3',
            Self::Exit => '0',
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::GetKey => "Get ECDSA key",
            Self::Sign => "Sign",
            Self::Verify => "Verify",
            Self::Exit => "Exit",
        }
    }
}

/**
    Errors that end the menu loop.
*/
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{call} failed: {source}")]
    Invoke {
        call: &'static str,
        #[source]
        source: InvokeError,
    },
    #[error("console I/O failed: {0}")]
    Console(#[from] io::Error),
}

impl DriverError {
    /// The failed boundary call, if that is what ended the loop.
    pub fn invoke_error(&self) -> Option<&InvokeError> {
        match self {
            Self::Invoke { source, .. } => Some(source),
            Self::Console(_) => None,
        }
    }
}

fn invoke_failed(call: &'static str) -> impl FnOnce(InvokeError) -> DriverError {
    move |source| DriverError::Invoke { call, source }
}

/**
    Run the menu until exit, end of input, or a failed boundary call.
*/
pub fn run(
    session: &Session<'_>,
    config: &DriverConfig,
    input: &mut impl Read,
    output: &mut impl Write,
) -> Result<(), DriverError> {
    loop {
        for choice in MenuChoice::ALL {
            writeln!(output, "{} - {}", choice.key(), choice.label())?;
        }
        output.flush()?;

        let Some(key) = read_key(input)? else {
            debug!("end of input");
            return Ok(());
        };

        let Some(choice) = MenuChoice::from_key(key) else {
            writeln!(output, "Unknown choice '{}'", key.escape_ascii())?;
            continue;
        };
        writeln!(output)?;

        match choice {
            MenuChoice::GetKey => get_key(session, config, output)?,
            MenuChoice::Sign => sign(session, config, output)?,
            MenuChoice::Verify => verify_artifacts(config, output)?,
            MenuChoice::Exit => return Ok(()),
        }
    }
}

/// Next non-whitespace byte of input, so a line-buffered `1<Enter>` is one choice.
fn read_key(input: &mut impl Read) -> io::Result<Option<u8>> {
    let mut key = [0u8; 1];
    loop {
        match input.read(&mut key) {
            Ok(0) => return Ok(None),
            Ok(_) if key[0].is_ascii_whitespace() => {}
            Ok(_) => return Ok(Some(key[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn get_key(
    session: &Session<'_>,
    config: &DriverConfig,
    output: &mut impl Write,
) -> Result<(), DriverError> {
    let key = session
        .get_public_key()
        .map_err(invoke_failed("GET_KEY"))?;

    writeln!(output, "ECDSA Pubkey X: {}", hex::encode_upper(key.x))?;
    writeln!(output, "ECDSA Pubkey Y: {}", hex::encode_upper(key.y))?;

    let path = &config.public_key_path;
    match key.write(path) {
        Ok(()) => writeln!(output, "ECDSA public key saved in {}", path.display())?,
        Err(e) => {
            warn!("{e}");
            writeln!(output, "Error: {e}")?;
        }
    }
    Ok(())
}

fn sign(
    session: &Session<'_>,
    config: &DriverConfig,
    output: &mut impl Write,
) -> Result<(), DriverError> {
    let signature = session
        .sign(&config.message)
        .map_err(invoke_failed("SIGN"))?;

    writeln!(output, "ECDSA Signature R: {}", hex::encode_upper(signature.r))?;
    writeln!(output, "ECDSA Signature S: {}", hex::encode_upper(signature.s))?;

    let path = &config.signature_path;
    match signature.write(path) {
        Ok(()) => writeln!(output, "ECDSA signature saved in {}", path.display())?,
        Err(e) => {
            warn!("{e}");
            writeln!(output, "Error: {e}")?;
        }
    }
    Ok(())
}

fn verify_artifacts(config: &DriverConfig, output: &mut impl Write) -> Result<(), DriverError> {
    let artifacts = PublicKeyArtifact::read(&config.public_key_path).and_then(|key| {
        SignatureArtifact::read(&config.signature_path).map(|signature| (key, signature))
    });
    let (key, signature) = match artifacts {
        Ok(artifacts) => artifacts,
        Err(e) => {
            warn!("{e}");
            writeln!(output, "Cannot verify: {e}")?;
            return Ok(());
        }
    };

    match key.to_pem() {
        Ok(pem) => write!(output, "{pem}")?,
        Err(e) => {
            warn!("{e}");
            writeln!(output, "Cannot verify: {e}")?;
            return Ok(());
        }
    }

    writeln!(
        output,
        "SHA256 Digest:     {}",
        hex::encode_upper(sha256(&config.message))
    )?;

    match verify(&key, &signature, &config.message) {
        Ok(result) => writeln!(output, "Verification: {result}")?,
        Err(e) => {
            warn!("{e}");
            writeln!(output, "Cannot verify: {e}")?;
        }
    }
    Ok(())
}
