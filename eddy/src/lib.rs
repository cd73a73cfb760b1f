#![warn(missing_docs)]

//! Eddy is a runtime for self-adjusting (incremental) computation. Programs
//! are dynamic graphs of *changeable cells* and *readers*; when inputs
//! change, [`propagate`](adaptive::Engine::propagate) re-executes only the
//! affected readers, in virtual-time order, reusing prior work through
//! memoization. A push [event layer](adaptive::Event) is built on top of
//! cells.
//!
//! The entry point is [`Engine`](adaptive::Engine):
//!
//! ```rust
//! use eddy::adaptive::Engine;
//!
//! let mut engine = Engine::new();
//! let (celsius, set_celsius) = engine.changeable(0i64);
//! let fahrenheit = engine.lift(celsius, |&c| c * 9 / 5 + 32);
//! assert_eq!(engine.read(fahrenheit), Ok(32));
//!
//! engine.write(set_celsius, 100);
//! engine.propagate();
//! assert_eq!(engine.read(fahrenheit), Ok(212));
//! ```
//!
//! The engine is strictly single-threaded: all state lives in one
//! [`Engine`](adaptive::Engine) value and every handle is a key into it.
//! External schedulers (timers, I/O loops) integrate by calling
//! [`write`](adaptive::Engine::write) or [`send`](adaptive::Engine::send)
//! and then [`propagate`](adaptive::Engine::propagate).

pub mod adaptive;
pub mod util;
