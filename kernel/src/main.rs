#![no_std]
#![no_main]

use bootloader_api::{entry_point, BootInfo};
use kernel::{fatal, gdt, interrupts, keyboard, logger, memory, serial, syscall_boot};
use x86_64::VirtAddr;

entry_point!(kmain);

/// Runs with interrupts disabled, as guaranteed by the boot contract.
/// Brings up every component in dependency order, then idles.
fn kmain(boot_info: &'static mut BootInfo) -> ! {
    serial::init();
    logger::init();
    log::info!("MonkOS booting");

    gdt::init();

    let physical_memory_offset = VirtAddr::new(
        boot_info
            .physical_memory_offset
            .into_option()
            .expect("boot loader did not provide a physical memory offset"),
    );
    memory::init(physical_memory_offset, &boot_info.memory_regions);

    interrupts::init();
    keyboard::init();
    syscall_boot::init();

    log::info!("boot complete, idling");
    kernel::hlt_loop();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    fatal::fatal_with(format_args!("panic: {}", info));
}
