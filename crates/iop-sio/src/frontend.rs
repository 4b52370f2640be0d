use bitflags::bitflags;
use tracing::debug;

bitflags! {
    /// PCI command register bits the front-end cares about.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct PciCommand: u16 {
        const IO_SPACE = 1 << 0;
        const MEMORY_SPACE = 1 << 1;
        const BUS_MASTER = 1 << 2;
        const _ = !0;
    }
}

/// Storage front-end sitting behind the coprocessor. Only the part that must survive a
/// snapshot is modelled: the command register and whether the coprocessor has started it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusMasterFrontEnd {
    command: PciCommand,
    started: bool,
}

impl BusMasterFrontEnd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coprocessor start/wakeup hook: enables memory decoding and bus mastering.
    pub fn start(&mut self) {
        self.command |= PciCommand::MEMORY_SPACE | PciCommand::BUS_MASTER;
        self.started = true;
        debug!(command = self.command.bits(), "front-end started");
    }

    pub fn command(&self) -> PciCommand {
        self.command
    }

    pub fn set_command(&mut self, command: PciCommand) {
        self.command = command;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn bus_master_enabled(&self) -> bool {
        self.command.contains(PciCommand::BUS_MASTER)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Applies restored state; a front-end saved while started is started again so the
    /// side effects of `start` are re-established.
    pub(crate) fn restore(&mut self, command: PciCommand, started: bool) {
        self.command = command;
        self.started = false;
        if started {
            self.start();
        }
    }
}
