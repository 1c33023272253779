// confchannel is a Conflation Channel.
// It only ever holds the latest value. Neither send nor
// recv blocks on the other side. There is one Sender and
// any number of Receivers; every Receiver sees the most
// recent value, values in between may be skipped or seen
// twice.

use std::sync::{Arc, RwLock, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct Channel<T: Copy + Default> {
	// Double buffered. The Sender writes the slot readers
	// aren't pointed at then flips ind.
	data: [RwLock<T>; 2],
	dropped_sender: AtomicBool,
	ind: AtomicUsize,
	num_receivers: AtomicUsize,
}

pub struct Sender<T: Copy + Default>{
	chan: Arc<Channel<T>>,
	ind: usize,
}

pub struct Receiver<T: Copy + Default>{
	chan: Arc<Channel<T>>,
}

pub fn confchannel<T: Copy + Default>() -> (Sender<T>, Receiver<T>) {
	let chan = Arc::new(Channel{
		data: [RwLock::new(T::default()), RwLock::new(T::default())],
		dropped_sender: AtomicBool::new(false),
		ind: AtomicUsize::new(0),
		num_receivers: AtomicUsize::new(1),
	});

	// The first send goes to the slot nobody reads yet
	(Sender{chan: chan.clone(), ind: 1}, Receiver{chan: chan})
}

impl<T: Copy + Default> Drop for Sender<T> {
	fn drop(&mut self) {
		self.chan.dropped_sender.store(true, Ordering::SeqCst);
	}
}

impl<T: Copy + Default> Sender<T> {
	// send publishes data and returns how many Receivers
	// are still alive to see it.
	pub fn send(&mut self, data: T) -> usize {
		{
			// A panicked reader can't leave a Copy value half
			// written so a poisoned lock is still good.
			let mut x = self.chan.data[self.ind].write()
				.unwrap_or_else(PoisonError::into_inner);
			*x = data;
		}

		self.chan.ind.store(self.ind, Ordering::SeqCst);
		self.ind = (self.ind + 1) % 2;
		self.chan.num_receivers.load(Ordering::SeqCst)
	}
}

impl<T: Copy + Default> Receiver<T> {
	// recv returns the latest value, or None once the
	// Sender has gone away.
	pub fn recv(&self) -> Option<T> {
		if self.is_closed() {
			return None;
		}
		let ind = self.chan.ind.load(Ordering::SeqCst);
		let x = self.chan.data[ind].read()
			.unwrap_or_else(PoisonError::into_inner);
		Some(*x)
	}

	pub fn is_closed(&self) -> bool {
		self.chan.dropped_sender.load(Ordering::SeqCst)
	}
}

impl<T: Copy + Default> Clone for Receiver<T> {
	fn clone(&self) -> Self {
		self.chan.num_receivers.fetch_add(1, Ordering::SeqCst);
		Self{
			chan: self.chan.clone(),
		}
	}
}

impl<T: Copy + Default> Drop for Receiver<T> {
	fn drop(&mut self) {
		self.chan.num_receivers.fetch_sub(1, Ordering::SeqCst);
	}
}

impl<T: Copy + Default> Iterator for Receiver<T> {
	type Item = T;

	fn next(&mut self) -> Option<Self::Item> {
		self.recv()
	}
}
