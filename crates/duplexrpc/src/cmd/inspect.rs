use std::fs::File;
use std::io::{BufReader, Read};

use duplexrpc_frame::{FrameConfig, FrameReader};
use duplexrpc_host::Envelope;

use crate::cmd::InspectArgs;
use crate::exit::{frame_error, host_error, io_error, CliResult, SUCCESS};
use crate::output::{print_envelopes, OutputFormat};

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let config = FrameConfig {
        max_payload_size: args.max_frame,
        ..FrameConfig::default()
    };
    let envelopes = match &args.file {
        Some(path) => {
            let file = File::open(path)
                .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
            read_envelopes(BufReader::new(file), config)?
        }
        None => read_envelopes(std::io::stdin().lock(), config)?,
    };

    tracing::debug!(frames = envelopes.len(), "dump decoded");
    print_envelopes(&envelopes, format);
    Ok(SUCCESS)
}

/// Decode every frame of a wire dump. A dump that ends mid-frame, or a
/// frame that is not an envelope, is an error naming the frame index.
fn read_envelopes<R: Read>(source: R, config: FrameConfig) -> CliResult<Vec<Envelope>> {
    let mut reader = FrameReader::with_config(source, config);
    let mut envelopes = Vec::new();
    loop {
        let index = envelopes.len();
        let frame = match reader.try_read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => return Err(frame_error(&format!("frame {index} unreadable"), err)),
        };
        let envelope = Envelope::decode(&frame)
            .map_err(|err| host_error(&format!("frame {index} is not an envelope"), err))?;
        envelopes.push(envelope);
    }
    Ok(envelopes)
}
