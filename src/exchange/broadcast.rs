// Fire and forget multicast of each measurement as a
// binary frame. No retries, no acknowledgement.

use std::mem::size_of;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;

use libc;

use crate::errors::*;
use crate::echo::Multicast;
use crate::{info, tags};
use super::msgs::{Measurement, FRAME_LEN};

pub struct Broadcaster {
	socket: UdpSocket,
	target: SocketAddr,
}

// std has no setter for IP_MULTICAST_IF
fn set_multicast_if(socket: &UdpSocket, interface: Ipv4Addr) -> Result<()> {
	let addr = libc::in_addr{
		s_addr: u32::from_ne_bytes(interface.octets()),
	};
	let ret = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			libc::IPPROTO_IP,
			libc::IP_MULTICAST_IF,
			&addr as *const libc::in_addr as *const libc::c_void,
			size_of::<libc::in_addr>() as libc::socklen_t,
		)
	};
	if ret != 0 {
		return Err(Box::new(std::io::Error::last_os_error()));
	}
	Ok(())
}

impl Broadcaster {
	pub fn new(config: &Multicast) -> Result<Self> {
		let group: Ipv4Addr = config.group.parse()?;
		let interface: Ipv4Addr = config.interface.parse()?;
		if !group.is_multicast() {
			return Err(Error::new(ErrorType::InvalidRequest));
		}

		let socket = UdpSocket::bind("0.0.0.0:0")?;
		// Stay on the local network
		socket.set_multicast_ttl_v4(1)?;
		set_multicast_if(&socket, interface)?;
		// A full send buffer drops the frame rather than
		// stalling production
		socket.set_nonblocking(true)?;

		info!("multicast enabled", tags![
			("group", &config.group),
			("port", &config.port.to_string()),
			("interface", &config.interface)
		]);
		Ok(Self::with_socket(socket, SocketAddr::from((group, config.port))))
	}

	pub fn with_socket(socket: UdpSocket, target: SocketAddr) -> Self {
		Self{
			socket: socket,
			target: target,
		}
	}

	pub fn send(&self, m: &Measurement) -> Result<()> {
		let sent = self.socket.send_to(&m.to_frame(), self.target)?;
		if sent != FRAME_LEN {
			return Err(Box::new(std::io::Error::new(
				std::io::ErrorKind::WriteZero, "short datagram")));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[test]
	fn frames_arrive_whole() {
		let rx = UdpSocket::bind("127.0.0.1:0").unwrap();
		rx.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
		let tx = UdpSocket::bind("127.0.0.1:0").unwrap();
		let b = Broadcaster::with_socket(tx, rx.local_addr().unwrap());

		let m = Measurement{yaw: 0.2, left_eye: 0, ..Measurement::default()};
		b.send(&m).unwrap();

		let mut buf = [0u8; 64];
		let (n, _) = rx.recv_from(&mut buf).unwrap();
		assert_eq!(n, FRAME_LEN);
		assert_eq!(Measurement::from_frame(&buf[..n]).unwrap(), m);
	}

	#[test]
	fn default_group_opens() {
		let b = Broadcaster::new(&Multicast::default()).unwrap();
		assert_eq!(b.target, "226.0.0.1:5032".parse().unwrap());
	}

	#[test]
	fn unicast_group_is_refused() {
		let config = Multicast{
			group: "10.0.0.1".to_string(),
			..Multicast::default()
		};
		let e = Broadcaster::new(&config).err().unwrap();
		assert_eq!(kind_of(&e), Some(ErrorType::InvalidRequest));

		let config = Multicast{
			group: "not an address".to_string(),
			..Multicast::default()
		};
		assert!(Broadcaster::new(&config).is_err());
	}
}
