#![no_std]
#![cfg_attr(test, no_main)]
#![feature(abi_x86_interrupt)]
extern crate alloc;

pub mod apic;
pub mod consts;
pub mod error;
pub mod gdt;
pub mod interrupt;
pub mod limine_requests;
pub mod logger;
pub mod memory;
pub mod task;
pub mod time;

pub fn hlt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}
