use std::sync::Arc;

use jack;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioPort, CaptureTap, PlaybackQueue};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::utils::consts::{INPUT_PORT_NAME, JACK_CLIENT_NAME, OUTPUT_PORT_NAME};

fn device_error(e: jack::Error) -> LinkError {
    LinkError::Device(e.to_string())
}

pub fn print_jack_info(client: &jack::Client) -> (usize, usize) {
    let sample_rate = client.sample_rate();
    let buffer_size = client.buffer_size();
    info!("JACK Server Info:");
    info!("  Sample Rate: {} Hz", sample_rate);
    info!("  Buffer Size: {} samples", buffer_size);
    info!(
        "  Buffer Duration: {:.2} ms",
        (buffer_size as f64 / sample_rate as f64) * 1000.0
    );
    (sample_rate as usize, buffer_size as usize)
}

/// Wire our ports to the requested system ports, or to the first physical
/// ones when none are configured.
pub fn connect_system_ports(
    client: &jack::Client,
    in_port_name: &str,
    out_port_name: &str,
    capture_from: Option<&str>,
    play_into: Option<&str>,
) {
    let system_outputs = client.ports(
        None,
        None,
        jack::PortFlags::IS_OUTPUT | jack::PortFlags::IS_PHYSICAL,
    );
    let system_inputs = client.ports(
        None,
        None,
        jack::PortFlags::IS_INPUT | jack::PortFlags::IS_PHYSICAL,
    );
    debug!("{} physical capture ports found", system_outputs.len());
    debug!("{} physical playback ports found", system_inputs.len());

    let source = capture_from
        .map(str::to_string)
        .or_else(|| system_outputs.first().cloned());
    let destination = play_into
        .map(str::to_string)
        .or_else(|| system_inputs.first().cloned());

    match source {
        Some(source) => match client.connect_ports_by_name(&source, in_port_name) {
            Ok(_) => info!("Connected Input: {} -> {}", source, in_port_name),
            Err(e) => error!("Failed connecting Input {} -> {}: {}", source, in_port_name, e),
        },
        None => warn!("No capture port to connect"),
    }

    match destination {
        Some(destination) => {
            match client.connect_ports_by_name(out_port_name, &destination) {
                Ok(_) => info!("Connected Output: {} -> {}", out_port_name, destination),
                Err(e) => error!(
                    "Failed connecting Output {} -> {}: {}",
                    out_port_name, destination, e
                ),
            }
        }
        None => warn!("No playback port to connect"),
    }
}

/// A running JACK client whose process callback feeds a [`CaptureTap`] and
/// drains a [`PlaybackQueue`].
pub struct JackDevice<P> {
    client: jack::AsyncClient<(), P>,
    port: AudioPort,
}

impl<P> JackDevice<P>
where
    P: jack::ProcessHandler + Send + 'static,
{
    pub fn port(&self) -> AudioPort {
        self.port.clone()
    }

    pub fn close(self) -> Result<()> {
        self.client
            .deactivate()
            .map_err(device_error)?;
        info!("JACK client closed");
        Ok(())
    }
}

pub fn open(
    config: &LinkConfig,
) -> Result<JackDevice<impl jack::ProcessHandler + Send + 'static>> {
    let (client, status) =
        jack::Client::new(JACK_CLIENT_NAME, jack::ClientOptions::NO_START_SERVER)
            .map_err(device_error)?;
    info!("JACK client status: {:?}", status);
    let (sample_rate, _) = print_jack_info(&client);
    if sample_rate != config.sample_rate as usize {
        return Err(LinkError::Device(format!(
            "JACK runs at {} Hz but the link is configured for {} Hz",
            sample_rate, config.sample_rate
        )));
    }

    let in_port = client
        .register_port(INPUT_PORT_NAME, jack::AudioIn::default())
        .map_err(device_error)?;
    let mut out_port = client
        .register_port(OUTPUT_PORT_NAME, jack::AudioOut::default())
        .map_err(device_error)?;
    let in_port_name = in_port.name().map_err(device_error)?;
    let out_port_name = out_port.name().map_err(device_error)?;

    let tap = Arc::new(CaptureTap::new());
    let queue = Arc::new(PlaybackQueue::new());
    let tap_cb = tap.clone();
    let queue_cb = queue.clone();
    let process = jack::contrib::ClosureProcessHandler::new(
        move |_: &jack::Client, ps: &jack::ProcessScope| -> jack::Control {
            tap_cb.deliver(in_port.as_slice(ps));
            queue_cb.fill(out_port.as_mut_slice(ps));
            jack::Control::Continue
        },
    );

    let client = client
        .activate_async((), process)
        .map_err(device_error)?;
    connect_system_ports(
        client.as_client(),
        &in_port_name,
        &out_port_name,
        config.input_port.as_deref(),
        config.output_port.as_deref(),
    );

    Ok(JackDevice {
        client,
        port: AudioPort::new(tap, queue),
    })
}
