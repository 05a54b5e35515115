//! Compresses a few independent messages with pooled encoders and reads them back with pooled
//! decoders, showing that only one codec context of each kind is ever constructed.

use std::io::{self, Read, Write};

use codec_pool::{DecoderPool, EncoderOption, EncoderPool};

fn main() -> io::Result<()> {
    let encoders = EncoderPool::with_options([EncoderOption::Level(9)]);
    let decoders = DecoderPool::new();

    for message in ["first message", "second message", "third message"] {
        let mut encoder = encoders.acquire(Vec::new())?;
        encoder.write_all(message.as_bytes())?;
        let compressed = encoder.finish()?;

        let mut stream = decoders.acquire(compressed.as_slice())?.into_stream();
        let mut decompressed = String::new();
        stream.read_to_string(&mut decompressed)?;
        stream.close();

        println!("{message:?} -> {} compressed bytes -> {decompressed:?}", compressed.len());
    }

    println!(
        "encoder contexts: {}, decoder contexts: {}",
        encoders.live_handles(),
        decoders.live_handles()
    );

    Ok(())
}
