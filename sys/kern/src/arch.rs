// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture-specific support.
//!
//! In practice, this works by
//!
//! - Conditionally defining a nested module (below).
//! - `pub use`-ing its contents
//!
//! Thus, all architecture-specific types and functions show up right here in
//! the `arch` module, magically tailored for the current target.
//!
//! For this to work, each architecture support module must define the same set
//! of names: `SavedState`, `Cpu`, `klog!`, `uassert!`, `now`, `idle`,
//! `reinitialize`, `apply_memory_protection`, `set_current_task` and
//! `start_first_task`. The real target adds what only boot needs:
//! `install_vectors`, `enable_mmu`, `kernel_image`, `user_image` and
//! `user_entry`.

cfg_if::cfg_if! {
    if #[cfg(not(target_pointer_width = "64"))] {
        compile_error!("non-64-bit targets not supported (even for simulation)");
    } else if #[cfg(all(target_arch = "aarch64", target_os = "none"))] {
        #[macro_use]
        pub mod aarch64;
        pub use aarch64::*;
    } else if #[cfg(not(target_os = "none"))] {
        #[macro_use]
        pub mod fake;
        pub use fake::*;
    } else {
        compile_error!("support for this architecture not implemented");
    }
}
