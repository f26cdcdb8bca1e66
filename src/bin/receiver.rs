//! Receiver CLI: takes a transfer key and an output directory and
//! writes whatever data packets arrive through the Receiver Writer.
//! Grounded on the teacher's `main.rs`, generalized from "scan BLE,
//! dial libp2p, write `FileData` blobs" to "accept packets from a
//! `PeerChannel` and run them through deframe→decrypt→reorder→write"
//! since real transport/signaling are consumed ports (spec §1). Without
//! a live peer, this CLI self-feeds a synthetic payload over a
//! `LoopbackChannel` to demonstrate the write path end-to-end.

use std::path::PathBuf;

use ponswarp::config::TransferConfig;
use ponswarp::crypto::TransferKey;
use ponswarp::packet::Packet;
use ponswarp::ports::{LoopbackChannel, PeerChannel, RandomAccessSink};
use ponswarp::writer::ReceiverWriter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let key_b64 = args.next().ok_or_else(|| anyhow::anyhow!("usage: ponswarp-receiver <key> <output-dir>"))?;
    let output_dir = PathBuf::from(args.next().ok_or_else(|| anyhow::anyhow!("usage: ponswarp-receiver <key> <output-dir>"))?);
    let key = TransferKey::from_url_safe_b64(&key_b64)?;

    let config = TransferConfig::default();
    let demo_payload = b"this file arrived over a LoopbackChannel, since real peer transport is a consumed port (spec scope)".to_vec();
    let total_size = demo_payload.len() as u64;

    let (chan, mut inbound) = LoopbackChannel::pair();
    let sender_key = TransferKey::from_bytes(*key.as_bytes());
    let feeder = tokio::spawn(async move {
        let ciphertext = ponswarp::crypto::seal(&sender_key, 0, &demo_payload).unwrap();
        chan.send(Packet { file_id: 0, chunk_index: 0, byte_offset: 0, payload: ciphertext }.encode(), false)
            .await
            .unwrap();
        chan.send(Packet::eos(1, total_size).encode(), false).await.unwrap();
    });

    let dest_path = output_dir.join("received.bin");
    let sink = RandomAccessSink::create(&dest_path).await?;
    let mut writer = ReceiverWriter::new(sink, Some(key), total_size, false, &config);

    loop {
        let bytes = inbound.recv().await.expect("sender task closed unexpectedly");
        let packet = Packet::decode(&bytes)?;
        let outcome = writer.write_packet(packet).await?;
        if let Some(written) = outcome.completed {
            println!("received {written} bytes -> {}", dest_path.display());
            break;
        }
    }
    feeder.await?;
    Ok(())
}
