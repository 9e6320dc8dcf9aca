use vespra_channels::InboundMessage;

/// A platform message the Supervisor has already admitted, carrying the
/// admission decision's `must_reply` flag (§4.1 step 4). The worker never
/// re-runs admission — it only coalesces and executes the turn.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub message: InboundMessage,
    pub must_reply: bool,
}

/// Everything the Supervisor can push onto a worker's `inbox` (§4.2).
pub enum SupervisorSignal {
    Inbound(InboundEvent),
    Shutdown,
}
