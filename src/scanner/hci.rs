//! Raw HCI socket backend for Mijia scanning.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{
    ADVERTISEMENT_CHANNEL_BUFFER_SIZE, Advertisement, AdvertisementResult, ScanError, ScanFuture,
    Scanner,
};
use crate::mac_address::MacAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use log::debug;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_SCAN_ACTIVE: u8 = 0x01;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// Scan interval and window, 10ms in 0.625ms units
const SCAN_INTERVAL: u16 = 0x0010;
const SCAN_WINDOW: u16 = 0x0010;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << u32::from(ptype);
    }

    fn set_event(&mut self, event: u8) {
        let bit = usize::from(event);
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Parameters of LE Set Scan Parameters, serialized little-endian.
fn scan_parameters(passive: bool) -> [u8; 7] {
    let [interval_lo, interval_hi] = SCAN_INTERVAL.to_le_bytes();
    let [window_lo, window_hi] = SCAN_WINDOW.to_le_bytes();
    [
        if passive { LE_SCAN_PASSIVE } else { LE_SCAN_ACTIVE },
        interval_lo,
        interval_hi,
        window_lo,
        window_hi,
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ]
}

fn os_error(what: &str) -> ScanError {
    ScanError::Bluetooth(format!("{what}: {}", io::Error::last_os_error()))
}

/// Open a raw HCI socket
fn open_hci_socket() -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(os_error("Failed to create HCI socket"));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), ScanError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(os_error("Failed to bind HCI socket"));
    }

    Ok(())
}

/// Only let LE meta events through
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(os_error("Failed to set HCI filter"));
    }

    Ok(())
}

fn send_hci_command(fd: &OwnedFd, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
    let packet = hci_command_packet(OGF_LE_CTL, ocf, params);
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(os_error("Failed to send HCI command"));
    }

    Ok(())
}

fn set_scan_enable(fd: &OwnedFd, enable: bool) -> Result<(), ScanError> {
    // Duplicates are kept: every advertisement carries a fresh reading
    send_hci_command(fd, OCF_LE_SET_SCAN_ENABLE, &[u8::from(enable), 0x00])
}

/// Split advertising data into `(ad_type, data)` pairs.
///
/// Stops at the first zero-length or truncated structure.
fn parse_ad_structures(mut data: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut fields = Vec::new();
    while let Some((&len, rest)) = data.split_first() {
        let len = usize::from(len);
        if len == 0 || rest.len() < len {
            break;
        }
        let (structure, tail) = rest.split_at(len);
        if let Some((&ad_type, value)) = structure.split_first() {
            fields.push((ad_type, value.to_vec()));
        }
        data = tail;
    }
    fields
}

/// Parse an LE advertising report event into advertisements.
///
/// `packet` is a full HCI event packet, starting with the packet type byte.
/// Reports are read sequentially; a truncated report ends parsing.
fn parse_advertising_report(packet: &[u8]) -> Vec<Advertisement> {
    let mut advertisements = Vec::new();

    // packet type, event code, parameter length, subevent
    let Some([HCI_EVENT_PKT, EVT_LE_META_EVENT, _, EVT_LE_ADVERTISING_REPORT]) =
        packet.first_chunk::<4>()
    else {
        return advertisements;
    };
    let Some((&num_reports, mut reports)) = packet[4..].split_first() else {
        return advertisements;
    };

    for _ in 0..num_reports {
        // event type(1) + address type(1) + address(6) + data length(1)
        let Some((head, rest)) = reports.split_first_chunk::<9>() else {
            break;
        };
        let data_len = usize::from(head[8]);
        // data + rssi
        if rest.len() < data_len + 1 {
            break;
        }

        let mut address = [0u8; 6];
        address.copy_from_slice(&head[2..8]);

        let (ad_data, tail) = rest.split_at(data_len);
        advertisements.push(Advertisement {
            address: MacAddress::from_le_bytes(address),
            fields: parse_ad_structures(ad_data),
        });
        reports = &tail[1..];
    }

    advertisements
}

/// Scanner reading advertising reports straight from an HCI device.
#[derive(Debug)]
pub struct HciScanner {
    dev_id: u16,
    cmd_fd: Option<OwnedFd>,
    task: Option<JoinHandle<()>>,
}

impl HciScanner {
    /// Scanner for HCI device `dev_id` (0 for hci0).
    pub fn new(dev_id: u16) -> Self {
        Self {
            dev_id,
            cmd_fd: None,
            task: None,
        }
    }

    fn open(&mut self, passive: bool) -> Result<mpsc::Receiver<AdvertisementResult>, ScanError> {
        // Event socket, filtered down to LE meta events
        let fd = open_hci_socket()?;
        bind_hci_socket(&fd, self.dev_id)?;
        set_hci_filter(&fd)?;

        // Separate socket for commands
        let cmd_fd = open_hci_socket()?;
        bind_hci_socket(&cmd_fd, self.dev_id)?;
        send_hci_command(&cmd_fd, OCF_LE_SET_SCAN_PARAMETERS, &scan_parameters(passive))?;
        set_scan_enable(&cmd_fd, true)?;

        let async_fd = AsyncFd::new(fd)
            .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {e}")))?;

        let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);
        self.task = Some(tokio::spawn(read_events(async_fd, tx)));
        self.cmd_fd = Some(cmd_fd);
        Ok(rx)
    }
}

/// Read HCI events until the socket fails or the receiver goes away.
async fn read_events(async_fd: AsyncFd<OwnedFd>, tx: mpsc::Sender<AdvertisementResult>) {
    let mut buf = [0u8; 258]; // Max HCI event size

    loop {
        let mut guard = match async_fd.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                let _ = tx
                    .send(Err(ScanError::Bluetooth(format!("HCI socket failed: {e}"))))
                    .await;
                return;
            }
        };

        // Drain all available packets before waiting again
        loop {
            let n = match guard.try_io(|inner| {
                let ret = unsafe {
                    libc::read(
                        inner.as_raw_fd(),
                        buf.as_mut_ptr() as *mut c_void,
                        buf.len(),
                    )
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            }) {
                Ok(Ok(n)) if n > 0 => n,
                Ok(Ok(_)) => break,
                Ok(Err(e)) => {
                    let _ = tx
                        .send(Err(ScanError::Bluetooth(format!("HCI read failed: {e}"))))
                        .await;
                    return;
                }
                Err(_would_block) => break,
            };

            for adv in parse_advertising_report(&buf[..n]) {
                if tx.send(Ok(adv)).await.is_err() {
                    return;
                }
            }
        }
    }
}

impl Scanner for HciScanner {
    fn start(&mut self, passive: bool) -> ScanFuture<'_, mpsc::Receiver<AdvertisementResult>> {
        Box::pin(async move { self.open(passive) })
    }

    fn stop(&mut self) -> ScanFuture<'_, ()> {
        Box::pin(async move {
            if let Some(task) = self.task.take() {
                task.abort();
            }
            match self.cmd_fd.take() {
                Some(cmd_fd) => {
                    debug!("Disabling LE scan on hci{}", self.dev_id);
                    set_scan_enable(&cmd_fd, false)
                }
                None => Ok(()),
            }
        })
    }
}
