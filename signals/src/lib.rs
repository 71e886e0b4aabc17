/*!
Observable values for the tenant sync engine.

# Design requirements:
- Writers and readers are different types: only the engine holds a [`Mut`], consumers get a [`Read`]
- Listeners receive a borrow of the new value and are never called while a lock is held,
  so a listener may read the signal (or any other signal) without deadlocking
- Dropping a [`ListenerGuard`] unsubscribes

# Basic usage

```rust
use tenantsync_signals::*;

let state = Mut::new("connecting");
let read = state.read();
let _guard = read.subscribe(|value: &&str| println!("state: {}", value));
state.set("connected");
assert_eq!(read.get(), "connected");
```
*/

pub mod broadcast;
pub mod porcelain;
pub mod signal;

pub use broadcast::{Broadcast, IntoListener, ListenerGuard};
pub use porcelain::wait::WaitResult;
pub use signal::{Mut, Read};
