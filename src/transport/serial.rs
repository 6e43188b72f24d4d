use crate::error::{AppResult, DaqError};
use tokio::task::spawn_blocking;
use tokio_serial::SerialPortBuilderExt;

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control. Bluetooth SPP modules such as
/// the HC-06 show up as an ordinary serial device (`/dev/rfcomm0`, `COM5`).
///
/// # Errors
///
/// Returns [`DaqError::Transport`] if the port cannot be opened.
#[tracing::instrument(err)]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> AppResult<tokio_serial::SerialStream> {
    let port_path_owned = port_path.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| DaqError::Transport(std::io::Error::from(e)))
    })
    .await
    .map_err(|e| DaqError::Transport(std::io::Error::other(e)))?
}
